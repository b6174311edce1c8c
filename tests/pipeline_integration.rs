//! End-to-end pipeline tests.
//!
//! Drives ranking, caching, gating, emission and feedback together through
//! the public API:
//! - Cold-cache scenario across all seven source kinds
//! - Shown-TTL boundary
//! - Relaxed reuse after the session trail moves on
//! - Invalidation on file-modifying actions
//! - Effectiveness classification

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use advisory::cache::PacketCache;
use advisory::config::{AdvisoryConfig, ConfigResolver, FeedbackConfig, RankerConfig};
use advisory::emission::EmissionTracker;
use advisory::feedback::{EffectivenessTracker, OutcomeEvent, PendingEmission};
use advisory::models::{
    AdviceContext, AuthorityTier, CacheDisposition, Candidate, EventKind, MatchConfidence,
    Outcome, PacketStatus, SourceKind, ToolEvent,
};
use advisory::ranking::{FusionRanker, ModifierTable};
use advisory::sources::{SourceRegistry, StaticSource};
use advisory::{AdvisoryEngine, SuppressionGate};
use serde_json::json;

// ============================================================================
// Fixtures
// ============================================================================

/// Two candidates per source. Relevance, quality and trust are equal, so the
/// composite score equals that value.
fn scenario_candidates() -> Vec<(SourceKind, Vec<Candidate>)> {
    let uniform = |kind, text: &str, x: f32| Candidate::new(kind, text).with_scores(x, x, x);
    vec![
        (
            SourceKind::Rules,
            vec![
                uniform(SourceKind::Rules, "Never commit credentials", 1.0).safety_critical(),
                uniform(SourceKind::Rules, "Rotate signing keys quarterly", 0.40),
            ],
        ),
        (
            SourceKind::Semantic,
            vec![
                uniform(SourceKind::Semantic, "Use the shared auth middleware", 0.90),
                uniform(SourceKind::Semantic, "Check token expiry before refresh", 0.62),
            ],
        ),
        (
            SourceKind::Episodic,
            vec![
                uniform(SourceKind::Episodic, "The last login refactor broke SSO", 0.86),
                uniform(SourceKind::Episodic, "Session cookies were once unsigned", 0.30),
            ],
        ),
        (
            SourceKind::DomainPlugin,
            vec![
                uniform(SourceKind::DomainPlugin, "OAuth state must be single use", 0.75),
                uniform(SourceKind::DomainPlugin, "Prefer PKCE for public clients", 0.20),
            ],
        ),
        (
            SourceKind::Conventions,
            vec![
                uniform(SourceKind::Conventions, "Auth errors map to 401", 0.70),
                uniform(SourceKind::Conventions, "Log auth failures at warn", 0.55),
            ],
        ),
        (
            SourceKind::Outcomes,
            vec![
                uniform(SourceKind::Outcomes, "Run the auth test suite after edits", 0.66),
                uniform(SourceKind::Outcomes, "Integration tests need the mock IdP", 0.35),
            ],
        ),
        (
            SourceKind::Preferences,
            vec![
                uniform(SourceKind::Preferences, "Keep auth changes in small commits", 0.58),
                uniform(SourceKind::Preferences, "Prefer explicit error types", 0.10),
            ],
        ),
    ]
}

fn registry(reversed: bool) -> SourceRegistry {
    let mut sources = scenario_candidates();
    if reversed {
        sources.reverse();
    }
    sources
        .into_iter()
        .fold(SourceRegistry::new(), |registry, (kind, candidates)| {
            registry.with_source(StaticSource::new(kind, candidates))
        })
}

fn auth_context() -> AdviceContext {
    AdviceContext::new("P", "S", "Edit").with_intent("auth_security")
}

fn texts(ranking: &advisory::ranking::Ranking) -> Vec<String> {
    ranking
        .ranked
        .iter()
        .map(|s| s.candidate.text.clone())
        .collect()
}

// ============================================================================
// End-to-end scenario
// ============================================================================

#[test]
fn test_cold_cache_scenario() {
    let config = AdvisoryConfig::default();
    let context = auth_context();
    let modifiers = ModifierTable::new();

    // Ranking is deterministic, including across registry order.
    let ranking = FusionRanker::new(registry(false)).rank(&context, &config.ranker, &modifiers);
    let again = FusionRanker::new(registry(true)).rank(&context, &config.ranker, &modifiers);
    assert_eq!(texts(&ranking), texts(&again));
    assert_eq!(
        texts(&ranking),
        vec![
            "Never commit credentials",
            "Use the shared auth middleware",
            "The last login refactor broke SSO",
            "OAuth state must be single use",
            "Auth errors map to 401",
            "Run the auth test suite after edits",
            "Check token expiry before refresh",
            "Keep auth changes in small commits",
        ]
    );
    assert_eq!(ranking.lineage.contributions.len(), 7);

    // First call: miss, write-through, gate with budget 2.
    let cache = PacketCache::new();
    let tracker = EmissionTracker::new();
    let gate = SuppressionGate::new();
    let key = context.cache_key();
    let now = 10_000;
    assert!(cache.lookup(&key, &config.cache, now).is_none());
    let packet = cache.store(&key, ranking, &config.cache, &config.gate, now);
    assert_eq!(packet.status, PacketStatus::Ready);

    let snapshot = tracker.snapshot("S");
    let outcome = gate.evaluate(
        &packet.survivors,
        &snapshot.state,
        &snapshot.global,
        "S",
        "Edit",
        now,
        &config.gate,
    );
    let emitted = tracker.claim("S", "Edit", outcome, now, &config.gate);
    assert_eq!(config.gate.emission_budget, 2);
    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0].tier, AuthorityTier::Block);
    assert_eq!(emitted[1].tier, AuthorityTier::Warning);
    assert!(emitted[0].tier >= emitted[1].tier);

    // Second identical call within cooldown: READY packet, no survivors.
    let later = now + 5;
    let hit = cache.lookup(&key, &config.cache, later).expect("cached packet");
    assert_eq!(hit.confidence, MatchConfidence::Exact);
    assert_eq!(hit.packet.status, PacketStatus::Ready);

    let snapshot = tracker.snapshot("S");
    let outcome = gate.evaluate(
        &hit.packet.survivors,
        &snapshot.state,
        &snapshot.global,
        "S",
        "Edit",
        later,
        &config.gate,
    );
    assert!(outcome.survivors.is_empty());
    assert!(tracker.claim("S", "Edit", outcome, later, &config.gate).is_empty());
}

// ============================================================================
// Cooldown correctness
// ============================================================================

fn single_advice_engine() -> AdvisoryEngine {
    let registry = SourceRegistry::new().with_source(StaticSource::new(
        SourceKind::Rules,
        vec![
            Candidate::new(SourceKind::Rules, "Bump the schema version with every migration")
                .with_scores(0.9, 0.9, 0.9),
        ],
    ));
    AdvisoryEngine::builder(ConfigResolver::fixed(AdvisoryConfig::default()))
        .sources(registry)
        .ephemeral()
        .build()
}

fn pre_bash(at: u64) -> ToolEvent {
    ToolEvent::new(EventKind::PreTool, "sess", at)
        .with_tool("Bash")
        .with_cwd("/repo")
        .with_input(json!({"command": "sqlx migrate run"}))
}

#[test]
fn test_shown_ttl_exact_boundary() {
    let engine = single_advice_engine();
    let ttl = engine.config().gate.shown_ttl_secs;
    let shown_at = 50_000;

    let first = engine.handle_event(&pre_bash(shown_at));
    let advice = first.decision.expect("first emission").entries[0].advice_id.clone();

    assert!(engine.handle_event(&pre_bash(shown_at + 1)).is_silent());
    assert!(engine.handle_event(&pre_bash(shown_at + ttl)).is_silent());

    let eligible = engine.handle_event(&pre_bash(shown_at + ttl + 1));
    let decision = eligible.decision.expect("eligible again after ttl");
    assert_eq!(decision.entries[0].advice_id, advice);
}

#[test]
fn test_repeat_after_post_tool_is_relaxed_hit_and_suppressed() {
    let engine = single_advice_engine();
    let config = engine.config();

    let first = pre_bash(1_000);
    let first_key = engine.context_for(&first).cache_key();
    let response = engine.handle_event(&first);
    assert_eq!(response.decision.expect("first emission").cache, CacheDisposition::Miss);

    let post = ToolEvent::new(EventKind::PostTool, "sess", 1_001)
        .with_tool("Bash")
        .with_cwd("/repo")
        .with_input(json!({"command": "sqlx migrate run"}))
        .with_output(json!({"exit_code": 0}));
    assert!(engine.handle_event(&post).is_silent());

    // The completed call changes the volatile key component.
    let second = pre_bash(1_002);
    let second_key = engine.context_for(&second).cache_key();
    assert_ne!(first_key.exact(), second_key.exact());
    assert_eq!(first_key.relaxed(), second_key.relaxed());

    assert!(engine.handle_event(&second).is_silent());

    // Served from the first packet rather than re-ranked and stored.
    assert_eq!(engine.cache().len(), 1);
    assert!(engine.cache().get(&second_key).is_none());
    let hit = engine
        .cache()
        .lookup(&second_key, &config.cache, 1_002)
        .expect("relaxed hit");
    assert_eq!(hit.confidence, MatchConfidence::Relaxed);
    assert_eq!(hit.packet.key.exact(), first_key.exact());
}

// ============================================================================
// Invalidation propagation
// ============================================================================

#[test]
fn test_file_modification_invalidates_before_next_lookup() {
    let registry = SourceRegistry::new().with_source(StaticSource::new(
        SourceKind::Conventions,
        vec![
            Candidate::new(SourceKind::Conventions, "Keep handlers free of SQL")
                .with_scores(0.7, 0.7, 0.7)
                .with_resources(["src/handlers/user.rs"]),
        ],
    ));
    let engine = AdvisoryEngine::builder(ConfigResolver::fixed(AdvisoryConfig::default()))
        .sources(registry)
        .ephemeral()
        .build();

    let pre = ToolEvent::new(EventKind::PreTool, "sess", 1_000)
        .with_tool("Edit")
        .with_cwd("/repo")
        .with_input(json!({"file_path": "src/handlers/user.rs"}));
    let response = engine.handle_event(&pre);
    assert_eq!(response.decision.unwrap().cache, CacheDisposition::Miss);
    let key = engine.context_for(&pre).cache_key();

    let post = ToolEvent::new(EventKind::PostTool, "sess", 1_002)
        .with_tool("Write")
        .with_cwd("/repo")
        .with_input(json!({"file_path": "/repo/src/handlers/user.rs", "content": "..."}));
    engine.handle_event(&post);

    let packet = engine.cache().get(&key).expect("packet kept for audit");
    assert_eq!(packet.status, PacketStatus::Invalidated);
    assert!(packet.invalidation_reason.as_deref().is_some_and(|r| !r.is_empty()));
    let config = engine.config();
    assert!(engine.cache().lookup(&key, &config.cache, 1_003).is_none());
}

// ============================================================================
// Effectiveness classification
// ============================================================================

fn pending(at: u64) -> PendingEmission {
    PendingEmission {
        advice_id: Candidate::new(SourceKind::Semantic, "Validate R before writing").identity(),
        source: SourceKind::Semantic,
        session_id: "sess".to_string(),
        tool_name: "Edit".to_string(),
        resources: vec!["R".to_string()],
        fallback: false,
        emitted_at: at,
    }
}

fn outcome(at: u64, success: bool) -> OutcomeEvent {
    OutcomeEvent {
        session_id: "sess".to_string(),
        tool_name: "Edit".to_string(),
        resources: vec!["R".to_string()],
        success,
        user_correction: false,
        input_fingerprint: Some("Edit:validate R".to_string()),
        timestamp: at,
    }
}

#[test]
fn test_successful_follow_up_is_followed() {
    let tracker = EffectivenessTracker::new();
    let config = FeedbackConfig::default();
    tracker.record_emission(pending(100));

    let records = tracker.record_outcome(&outcome(101, true), &config);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, Outcome::Followed);
    assert!(!records[0].correction);
}

#[test]
fn test_failure_then_retry_is_unhelpful() {
    let tracker = EffectivenessTracker::new();
    let config = FeedbackConfig::default();
    tracker.record_emission(pending(100));

    let failed = tracker.record_outcome(&outcome(101, false), &config);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].outcome, Outcome::Unhelpful);

    // The retry has nothing left to correlate with.
    let retry = tracker.record_outcome(&outcome(110, true), &config);
    assert!(retry.is_empty());
    let stats = tracker.stats();
    assert!(stats[&SourceKind::Semantic].unhelpful > 0.99);
}

#[test]
fn test_retry_within_window_corrects_follow() {
    let tracker = EffectivenessTracker::new();
    let config = FeedbackConfig::default();
    tracker.record_emission(pending(100));
    assert_eq!(
        tracker.record_outcome(&outcome(101, true), &config)[0].outcome,
        Outcome::Followed
    );

    let retry = tracker.record_outcome(&outcome(101 + config.correction_window_secs, true), &config);
    assert_eq!(retry.len(), 1);
    assert_eq!(retry[0].outcome, Outcome::Unhelpful);
    assert!(retry[0].correction);

    let stats = &tracker.stats()[&SourceKind::Semantic];
    assert!(stats.followed < 0.01);
    assert!(stats.unhelpful > 0.99);
}

#[test]
fn test_feedback_shifts_ranking_within_bounds() {
    let tracker = EffectivenessTracker::new();
    let feedback = FeedbackConfig::default();
    let ranker = RankerConfig::default();
    for i in 0..20 {
        let at = 1_000 + i * 1_000;
        tracker.record_emission(pending(at));
        tracker.record_outcome(&outcome(at + 1, false), &feedback);
    }
    let modifiers = tracker.modifiers(30_000, &ranker, &feedback);
    let semantic = modifiers[&SourceKind::Semantic];
    assert!(semantic < 1.0);
    assert!(semantic >= ranker.modifier_min);
}
