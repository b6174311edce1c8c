//! Advisory engine.
//!
//! One call per host event. The hot lane never returns an error: every
//! failure inside is logged and degrades to silence.
//!
//! | Event | Hot-lane work |
//! |-------|---------------|
//! | `pre_tool` | lookup or rank, gate, synthesize, emit |
//! | `post_tool` | invalidate modified resources, hand the outcome to feedback |
//! | `post_tool_failure` | as `post_tool`, then advise on the failed call |
//! | `user_turn_start` | record the prompt, queue prefetches |

mod prediction;

pub use prediction::predict_tools;

use crate::cache::PacketCache;
use crate::config::{AdvisoryConfig, ConfigResolver};
use crate::emission::EmissionTracker;
use crate::feedback::{EffectivenessTracker, OutcomeEvent, PendingEmission};
use crate::gate::SuppressionGate;
use crate::models::{
    AdviceContext, CacheDisposition, DecisionEntry, DecisionRecord, EventKind, MatchConfidence,
    ToolEvent,
};
use crate::ranking::{FusionRanker, IntentClassifier};
use crate::sources::SourceRegistry;
use crate::synthesis::{OllamaRefiner, SynthesisRouter};
use crate::workers::{LaneHandle, LaneTarget};
use crate::{Result, current_timestamp};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// What the host receives for one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineResponse {
    /// Rendered guidance, absent when silent.
    pub text: Option<String>,
    /// Machine-readable decision, absent when silent.
    pub decision: Option<DecisionRecord>,
}

impl EngineResponse {
    /// An empty response.
    #[must_use]
    pub fn silent() -> Self {
        Self::default()
    }

    /// Whether nothing is emitted.
    #[must_use]
    pub const fn is_silent(&self) -> bool {
        self.text.is_none()
    }
}

struct Inner {
    resolver: ConfigResolver,
    ranker: FusionRanker,
    intents: IntentClassifier,
    cache: PacketCache,
    gate: SuppressionGate,
    synthesis: SynthesisRouter,
    emission: EmissionTracker,
    feedback: EffectivenessTracker,
    lane: OnceLock<LaneHandle>,
    backlog: AtomicUsize,
}

/// Builds an [`AdvisoryEngine`].
#[must_use]
pub struct EngineBuilder {
    resolver: ConfigResolver,
    registry: SourceRegistry,
    synthesis: Option<SynthesisRouter>,
    persistent: bool,
}

impl EngineBuilder {
    /// Sets the candidate sources.
    pub fn sources(mut self, registry: SourceRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the synthesis router. Without one, a router is derived from the
    /// synthesis config.
    pub fn synthesis(mut self, router: SynthesisRouter) -> Self {
        self.synthesis = Some(router);
        self
    }

    /// Keeps all state in memory.
    pub const fn ephemeral(mut self) -> Self {
        self.persistent = false;
        self
    }

    /// Opens state under the data directory and builds the engine.
    #[must_use]
    pub fn build(self) -> AdvisoryEngine {
        let config = self.resolver.snapshot();
        let (cache, emission, feedback) = if self.persistent {
            (
                PacketCache::open(config.cache_index_path()),
                EmissionTracker::open(&config),
                EffectivenessTracker::open(&config),
            )
        } else {
            (
                PacketCache::new(),
                EmissionTracker::new(),
                EffectivenessTracker::new(),
            )
        };
        let synthesis = self
            .synthesis
            .unwrap_or_else(|| default_synthesis(&config));

        tracing::debug!(
            sources = self.registry.len(),
            persistent = self.persistent,
            packets = cache.len(),
            "Advisory engine opened"
        );

        AdvisoryEngine {
            inner: Arc::new(Inner {
                resolver: self.resolver,
                ranker: FusionRanker::new(self.registry),
                intents: IntentClassifier::new(),
                cache,
                gate: SuppressionGate::new(),
                synthesis,
                emission,
                feedback,
                lane: OnceLock::new(),
                backlog: AtomicUsize::new(0),
            }),
        }
    }
}

fn default_synthesis(config: &AdvisoryConfig) -> SynthesisRouter {
    let router = SynthesisRouter::new();
    if !config.synthesis.refinement_enabled {
        return router;
    }
    match OllamaRefiner::new(
        config.synthesis.refinement_endpoint.clone(),
        config.synthesis.refinement_model.clone(),
        Duration::from_millis(config.synthesis.hot_budget_ms),
    ) {
        Ok(refiner) => router.with_refiner(Arc::new(refiner)),
        Err(e) => {
            tracing::warn!(error = %e, "Refinement disabled, provider unavailable");
            router
        },
    }
}

/// The advisory decision engine.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct AdvisoryEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AdvisoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvisoryEngine")
            .field("sources", &self.inner.ranker.registry().len())
            .field("packets", &self.inner.cache.len())
            .field("lane", &self.inner.lane.get().is_some())
            .finish()
    }
}

impl AdvisoryEngine {
    /// Starts building an engine.
    pub fn builder(resolver: ConfigResolver) -> EngineBuilder {
        EngineBuilder {
            resolver,
            registry: SourceRegistry::new(),
            synthesis: None,
            persistent: true,
        }
    }

    /// Opens a persistent engine over `registry`.
    #[must_use]
    pub fn open(resolver: ConfigResolver, registry: SourceRegistry) -> Self {
        Self::builder(resolver).sources(registry).build()
    }

    /// Routes prefetch and outcome work to a background lane.
    ///
    /// Without a lane, outcomes are applied inline and prefetch is skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a lane is already attached.
    pub fn attach_lane(&self, lane: LaneHandle) -> Result<()> {
        self.inner
            .lane
            .set(lane)
            .map_err(|_| crate::Error::InvalidInput("background lane already attached".to_string()))
    }

    /// Reports how many events are waiting behind the current one.
    pub fn note_backlog(&self, depth: usize) {
        self.inner.backlog.store(depth, Ordering::Relaxed);
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<AdvisoryConfig> {
        self.inner.resolver.snapshot()
    }

    /// The packet cache.
    #[must_use]
    pub fn cache(&self) -> &PacketCache {
        &self.inner.cache
    }

    /// The feedback loop.
    #[must_use]
    pub fn feedback(&self) -> &EffectivenessTracker {
        &self.inner.feedback
    }

    /// The emission tracker.
    #[must_use]
    pub fn emission(&self) -> &EmissionTracker {
        &self.inner.emission
    }

    /// Handles one host event.
    #[tracing::instrument(
        skip_all,
        fields(kind = %event.kind, session = %event.session_id, tool = %event.tool())
    )]
    pub fn handle_event(&self, event: &ToolEvent) -> EngineResponse {
        let started = Instant::now();
        let config = self.inner.resolver.snapshot();

        let response = match event.kind {
            EventKind::PreTool => {
                let response = self.advise(event, &config, started);
                self.inner.emission.observe(event);
                response
            },
            EventKind::PostTool => {
                self.after_tool(event, &config);
                EngineResponse::silent()
            },
            EventKind::PostToolFailure => {
                self.after_tool(event, &config);
                self.advise(event, &config, started)
            },
            EventKind::UserTurnStart => {
                self.inner.emission.observe(event);
                self.on_user_turn(event, &config);
                EngineResponse::silent()
            },
        };

        let elapsed = started.elapsed();
        metrics::histogram!("advisory_hot_lane_latency_ms", "event" => event.kind.as_str())
            .record(elapsed.as_secs_f64() * 1_000.0);
        if let Some(lane) = self.inner.lane.get() {
            lane.governor()
                .observe(elapsed, self.inner.backlog.load(Ordering::Relaxed));
        }
        response
    }

    /// Builds the ranking context for an event from the session trail.
    #[must_use]
    pub fn context_for(&self, event: &ToolEvent) -> AdviceContext {
        let trail = self.inner.emission.trail(&event.session_id);
        let resources = event.resource_refs();
        let mut text = event.query_text();
        if let Some(prompt) = trail.last_prompt.as_deref() {
            text.push(' ');
            text.push_str(prompt);
        }
        let intent = self.inner.intents.classify(event.tool(), &resources, &text);

        let mut context = AdviceContext::new(
            event.cwd.clone().unwrap_or_default(),
            event.session_id.clone(),
            event.tool(),
        )
        .with_intent(intent.as_str())
        .with_phase(trail.phase)
        .with_recent_tools(trail.recent_tools)
        .with_resources(resources)
        .with_query_text(event.query_text());
        if let Some(prompt) = trail.last_prompt {
            context = context.with_last_prompt(prompt);
        }
        context
    }

    fn advise(&self, event: &ToolEvent, config: &AdvisoryConfig, started: Instant) -> EngineResponse {
        if event.tool().is_empty() {
            return EngineResponse::silent();
        }
        let inner = &self.inner;
        let now = event.timestamp;
        let context = self.context_for(event);
        let key = context.cache_key();

        let (packet, disposition) = match inner.cache.lookup(&key, &config.cache, now) {
            Some(hit) => {
                let disposition = match hit.confidence {
                    MatchConfidence::Exact => CacheDisposition::ExactHit,
                    MatchConfidence::Relaxed => CacheDisposition::RelaxedHit,
                };
                (hit.packet, disposition)
            },
            None => {
                let modifiers = inner.feedback.modifiers(now, &config.ranker, &config.feedback);
                let ranking = inner.ranker.rank(&context, &config.ranker, &modifiers);
                let packet = inner
                    .cache
                    .store(&key, ranking, &config.cache, &config.gate, now);
                (packet, CacheDisposition::Miss)
            },
        };

        let snapshot = inner.emission.snapshot(&event.session_id);
        let outcome = inner.gate.evaluate(
            &packet.survivors,
            &snapshot.state,
            &snapshot.global,
            &event.session_id,
            event.tool(),
            now,
            &config.gate,
        );
        let survivors =
            inner
                .emission
                .claim(&event.session_id, event.tool(), outcome, now, &config.gate);
        if survivors.is_empty() {
            return EngineResponse::silent();
        }

        let budget = Duration::from_millis(config.synthesis.hot_budget_ms);
        let remaining = budget.saturating_sub(started.elapsed());
        let Some(rendered) = inner.synthesis.render(&survivors, &config.synthesis, remaining)
        else {
            return EngineResponse::silent();
        };

        for survivor in &survivors {
            let resources: BTreeSet<String> = survivor
                .scored
                .candidate
                .resources
                .iter()
                .chain(&context.resources)
                .cloned()
                .collect();
            inner.feedback.record_emission(PendingEmission {
                advice_id: survivor.scored.advice_id.clone(),
                source: survivor.scored.candidate.source,
                session_id: event.session_id.clone(),
                tool_name: event.tool().to_string(),
                resources: resources.into_iter().collect(),
                fallback: survivor.fallback,
                emitted_at: now,
            });
        }

        let decision = DecisionRecord {
            id: Uuid::now_v7().to_string(),
            recorded_at: Utc::now(),
            session_id: event.session_id.clone(),
            event: event.kind,
            tool_name: event.tool().to_string(),
            cache_key: key.exact(),
            cache: disposition,
            entries: survivors.iter().map(DecisionEntry::from).collect(),
            lineage: packet.lineage.clone(),
            refined: rendered.refined,
            rendered_chars: rendered.text.chars().count(),
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        inner.emission.record_decision(&decision);

        tracing::debug!(
            emitted = decision.entries.len(),
            cache = disposition.as_str(),
            refined = rendered.refined,
            "Advice emitted"
        );
        EngineResponse {
            text: Some(rendered.text),
            decision: Some(decision),
        }
    }

    fn after_tool(&self, event: &ToolEvent, config: &AdvisoryConfig) {
        self.inner.emission.observe(event);

        for path in event.modified_resources() {
            let invalidated = self.inner.cache.invalidate_resource(&path, event.timestamp);
            if invalidated > 0 {
                tracing::debug!(path = %path, invalidated, "Invalidated packets");
            }
        }

        match self.inner.lane.get() {
            Some(lane) => {
                if !lane.submit_outcome(event.clone()) {
                    tracing::debug!("Outcome queue full, dropping outcome");
                }
            },
            None => {
                self.apply_outcome_with(event, config);
            },
        }
    }

    fn apply_outcome_with(&self, event: &ToolEvent, config: &AdvisoryConfig) {
        let outcome = OutcomeEvent {
            session_id: event.session_id.clone(),
            tool_name: event.tool().to_string(),
            resources: event.resource_refs(),
            success: event.succeeded(),
            user_correction: event.user_corrected(),
            input_fingerprint: Some(event.input_fingerprint()),
            timestamp: event.timestamp,
        };
        self.inner.feedback.record_outcome(&outcome, &config.feedback);
    }

    fn on_user_turn(&self, event: &ToolEvent, config: &AdvisoryConfig) {
        let Some(lane) = self.inner.lane.get() else {
            // Per-event processes have no background lane; use the turn
            // boundary for housekeeping instead.
            self.maintain_at(event.timestamp, config);
            return;
        };
        let trail = self.inner.emission.trail(&event.session_id);
        let prompt = event.prompt.clone().unwrap_or_default();
        for tool in predict_tools(&config.workers.prefetch_tools, &trail.recent_tools) {
            let intent = self.inner.intents.classify(&tool, &[], &prompt);
            let context = AdviceContext::new(
                event.cwd.clone().unwrap_or_default(),
                event.session_id.clone(),
                tool,
            )
            .with_intent(intent.as_str())
            .with_phase(trail.phase)
            .with_recent_tools(trail.recent_tools.clone())
            .with_last_prompt(prompt.clone())
            .with_query_text(prompt.clone());
            if !lane.submit_prefetch(context) {
                tracing::debug!("Prefetch queue full, dropping job");
            }
        }
    }

    /// Ranks and stores a packet for `context` unless a servable one exists.
    pub fn prefetch_at(&self, context: &AdviceContext, now: u64) {
        let config = self.inner.resolver.snapshot();
        let key = context.cache_key();
        if self.inner.cache.get(&key).is_some_and(|p| p.is_servable(now)) {
            return;
        }
        let modifiers = self
            .inner
            .feedback
            .modifiers(now, &config.ranker, &config.feedback);
        let ranking = self.inner.ranker.rank(context, &config.ranker, &modifiers);
        self.inner
            .cache
            .store(&key, ranking, &config.cache, &config.gate, now);
        metrics::counter!("advisory_prefetch_total").increment(1);
    }

    fn maintain_at(&self, now: u64, config: &AdvisoryConfig) {
        let report = self.inner.cache.sweep_stale(&config.cache, now);
        let expired = self.inner.feedback.expire(now, &config.feedback);
        self.inner.emission.sweep(now, &config.gate);
        if report.demoted + report.collected + expired.len() > 0 {
            tracing::debug!(
                demoted = report.demoted,
                collected = report.collected,
                expired = expired.len(),
                "Maintenance pass"
            );
        }
    }

    /// Runs one maintenance pass at `now`: cache sweep, pending expiry and
    /// gate state pruning.
    pub fn sweep(&self, now: u64) {
        let config = self.inner.resolver.snapshot();
        self.maintain_at(now, &config);
    }

    /// Persists the cache index and feedback state.
    ///
    /// # Errors
    ///
    /// Returns the first persistence error; both writes are attempted.
    pub fn flush(&self) -> Result<()> {
        let cache = self.inner.cache.flush();
        let feedback = self.inner.feedback.flush();
        cache.and(feedback)
    }
}

impl LaneTarget for AdvisoryEngine {
    fn prefetch(&self, context: AdviceContext) {
        self.prefetch_at(&context, current_timestamp());
    }

    fn apply_outcome(&self, event: ToolEvent) {
        let config = self.inner.resolver.snapshot();
        self.apply_outcome_with(&event, &config);
    }

    fn maintain(&self) {
        self.sweep(current_timestamp());
    }

    fn flush(&self) {
        if let Err(e) = Self::flush(self) {
            tracing::warn!(error = %e, "Failed to persist engine state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthorityTier, Candidate, SourceKind};
    use crate::sources::StaticSource;
    use serde_json::json;
    use tempfile::TempDir;

    fn registry() -> SourceRegistry {
        SourceRegistry::new()
            .with_source(StaticSource::new(
                SourceKind::Rules,
                vec![
                    Candidate::new(SourceKind::Rules, "Validate the JWT audience claim")
                        .with_scores(0.95, 0.9, 0.9)
                        .with_resources(["src/auth.rs"]),
                ],
            ))
            .with_source(StaticSource::new(
                SourceKind::Conventions,
                vec![
                    Candidate::new(SourceKind::Conventions, "Prefer early returns")
                        .with_scores(0.6, 0.6, 0.6),
                ],
            ))
    }

    fn engine() -> AdvisoryEngine {
        AdvisoryEngine::builder(ConfigResolver::fixed(AdvisoryConfig::default()))
            .sources(registry())
            .ephemeral()
            .build()
    }

    fn pre_edit(at: u64) -> ToolEvent {
        ToolEvent::new(EventKind::PreTool, "s1", at)
            .with_tool("Edit")
            .with_cwd("/work/proj")
            .with_input(json!({"file_path": "src/auth.rs", "new_string": "verify token"}))
    }

    #[test]
    fn test_pre_tool_emits_and_records() {
        let engine = engine();
        let response = engine.handle_event(&pre_edit(1_000));

        let text = response.text.unwrap();
        assert!(text.starts_with("[ADVISORY] Validate the JWT audience claim"));
        let decision = response.decision.unwrap();
        assert_eq!(decision.cache, CacheDisposition::Miss);
        assert_eq!(decision.entries[0].tier, AuthorityTier::Warning);
        assert_eq!(decision.entries[0].source, SourceKind::Rules);
        assert_eq!(engine.feedback().pending_count(), 2);
    }

    #[test]
    fn test_repeat_within_cooldown_is_silent_but_cached() {
        let engine = engine();
        assert!(!engine.handle_event(&pre_edit(1_000)).is_silent());

        let again = engine.handle_event(&pre_edit(1_010));
        assert!(again.is_silent());
        assert_eq!(engine.cache().len(), 1);
    }

    #[test]
    fn test_modifying_edit_invalidates_packet() {
        let engine = engine();
        engine.handle_event(&pre_edit(1_000));
        let key = engine.context_for(&pre_edit(1_000)).cache_key();

        let post = ToolEvent::new(EventKind::PostTool, "s1", 1_005)
            .with_tool("Edit")
            .with_cwd("/work/proj")
            .with_input(json!({"file_path": "/work/proj/src/auth.rs"}));
        assert!(engine.handle_event(&post).is_silent());

        let packet = engine.cache().get(&key).unwrap();
        assert_eq!(packet.status, crate::models::PacketStatus::Invalidated);
        assert!(packet.invalidation_reason.is_some());
    }

    #[test]
    fn test_outcome_applied_inline_without_lane() {
        let engine = engine();
        engine.handle_event(&pre_edit(1_000));

        let post = ToolEvent::new(EventKind::PostTool, "s1", 1_005)
            .with_tool("Edit")
            .with_input(json!({"file_path": "src/auth.rs"}));
        engine.handle_event(&post);

        let stats = engine.feedback().stats();
        assert!(stats[&SourceKind::Rules].followed > 0.99);
        assert_eq!(engine.feedback().pending_count(), 0);
    }

    #[test]
    fn test_events_without_tool_are_silent() {
        let engine = engine();
        let event = ToolEvent::new(EventKind::PreTool, "s1", 1);
        assert!(engine.handle_event(&event).is_silent());
    }

    #[test]
    fn test_user_turn_updates_context() {
        let engine = engine();
        engine.handle_event(
            &ToolEvent::new(EventKind::UserTurnStart, "s1", 1).with_prompt("rotate the oauth secret"),
        );
        let context = engine.context_for(&pre_edit(2));
        assert_eq!(context.last_prompt.as_deref(), Some("rotate the oauth secret"));
        assert_eq!(context.intent, "auth_security");
    }

    #[test]
    fn test_state_persists_between_processes() {
        let dir = TempDir::new().unwrap();
        let config = AdvisoryConfig::new().with_data_dir(dir.path());

        let first = AdvisoryEngine::open(ConfigResolver::fixed(config.clone()), registry());
        assert!(!first.handle_event(&pre_edit(1_000)).is_silent());
        first.flush().unwrap();

        let second = AdvisoryEngine::open(ConfigResolver::fixed(config), registry());
        let response = second.handle_event(&pre_edit(1_010));
        assert!(response.is_silent());
        assert_eq!(second.feedback().pending_count(), 2);
    }
}
