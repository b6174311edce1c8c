//! Effectiveness feedback loop.
//!
//! Every emitted candidate registers a pending correlation. Post-tool outcomes
//! are matched against pending entries of the same session by resource
//! overlap:
//!
//! | Follow-up | Record |
//! |-----------|--------|
//! | Success, overlap ≥ threshold, no correction | `followed` |
//! | Failure or explicit correction, overlap ≥ threshold | `unhelpful` |
//! | Failed, corrected or identical same-tool retry within the correction window of a `followed` | `unhelpful` correction |
//! | Nothing correlated before the pending TTL | `no_match` |
//!
//! Records are appended to the outcome log and folded into decayed per-source
//! statistics that the ranker reads as multiplicative modifiers.

mod stats;

pub use stats::SourceStats;

use crate::config::{AdvisoryConfig, FeedbackConfig, RankerConfig};
use crate::models::{AdviceId, EffectivenessRecord, Outcome, SourceKind, resource_matches};
use crate::ranking::ModifierTable;
use crate::storage::{AppendLog, read_json, write_json_atomic};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// An emitted candidate awaiting an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEmission {
    /// Identity of the emitted advice.
    pub advice_id: AdviceId,
    /// Source that proposed it.
    pub source: SourceKind,
    /// Session the advice was shown in.
    pub session_id: String,
    /// Tool the advice was shown for.
    pub tool_name: String,
    /// Resources referenced by the advice or the advised call.
    pub resources: Vec<String>,
    /// Whether the gate's fallback admitted it.
    #[serde(default)]
    pub fallback: bool,
    /// Emission time (Unix seconds).
    pub emitted_at: u64,
}

/// A completed tool call reported back to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeEvent {
    /// Session the call ran in.
    pub session_id: String,
    /// Tool that ran.
    pub tool_name: String,
    /// Resources the call touched.
    pub resources: Vec<String>,
    /// Whether the call succeeded.
    pub success: bool,
    /// Whether the user explicitly corrected the call.
    pub user_correction: bool,
    /// Fingerprint of the tool input, when known.
    pub input_fingerprint: Option<String>,
    /// Completion time (Unix seconds).
    pub timestamp: u64,
}

/// A recent `followed` record that a retry may still correct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RecentFollow {
    record: EffectivenessRecord,
    session_id: String,
    resources: Vec<String>,
    #[serde(default)]
    input_fingerprint: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PendingFile {
    #[serde(default)]
    pending: Vec<PendingEmission>,
    #[serde(default)]
    recent: Vec<RecentFollow>,
}

#[derive(Debug, Default)]
struct FeedbackState {
    pending: Vec<PendingEmission>,
    recent: Vec<RecentFollow>,
    stats: BTreeMap<SourceKind, SourceStats>,
    dirty: bool,
}

/// Correlates emissions with outcomes and maintains per-source statistics.
#[derive(Debug, Default)]
pub struct EffectivenessTracker {
    state: Mutex<FeedbackState>,
    outcome_log: Option<AppendLog>,
    stats_path: Option<PathBuf>,
    pending_path: Option<PathBuf>,
}

impl EffectivenessTracker {
    /// Creates an in-memory tracker with no persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the tracker over the data directory.
    ///
    /// Unreadable statistics or pending files are logged and treated as
    /// empty.
    #[must_use]
    pub fn open(config: &AdvisoryConfig) -> Self {
        let stats_path = config.stats_path();
        let pending_path = config.pending_path();

        let stats = read_json::<BTreeMap<SourceKind, SourceStats>>(&stats_path)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Discarding unreadable source statistics");
                None
            })
            .unwrap_or_default();
        let pending = read_json::<PendingFile>(&pending_path)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Discarding unreadable pending correlations");
                None
            })
            .unwrap_or_default();

        Self {
            state: Mutex::new(FeedbackState {
                pending: pending.pending,
                recent: pending.recent,
                stats,
                dirty: false,
            }),
            outcome_log: Some(AppendLog::new(config.outcome_log_path())),
            stats_path: Some(stats_path),
            pending_path: Some(pending_path),
        }
    }

    /// Registers a pending correlation for an emitted candidate.
    ///
    /// A second emission of the same identity in the same session replaces
    /// the earlier entry.
    pub fn record_emission(&self, emission: PendingEmission) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .pending
            .retain(|p| !(p.advice_id == emission.advice_id && p.session_id == emission.session_id));
        state.pending.push(emission);
        state.dirty = true;
        metrics::gauge!("advisory_feedback_pending").set(gauge_value(state.pending.len()));
    }

    /// Classifies an outcome against pending emissions.
    ///
    /// Returns every record produced, including `no_match` records for
    /// pending entries that expired before `event.timestamp`.
    #[tracing::instrument(skip_all, fields(tool = %event.tool_name, success = event.success))]
    pub fn record_outcome(
        &self,
        event: &OutcomeEvent,
        config: &FeedbackConfig,
    ) -> Vec<EffectivenessRecord> {
        let now = event.timestamp;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records = expire_locked(&mut state, now, config);

        // A failed, corrected or repeated same-tool call corrects a recent
        // `followed` record. A different successful call on the same
        // resources is ordinary follow-through.
        let mut corrections = Vec::new();
        state.recent.retain(|recent| {
            let repeated = event.input_fingerprint.is_some()
                && recent.input_fingerprint == event.input_fingerprint;
            let retried = recent.session_id == event.session_id
                && recent.record.tool_name.as_deref() == Some(event.tool_name.as_str())
                && now >= recent.record.timestamp
                && now <= recent.record.timestamp.saturating_add(config.correction_window_secs)
                && overlap(&recent.resources, &event.resources, true) >= config.min_overlap
                && (!event.success || event.user_correction || repeated);
            if retried {
                corrections.push(EffectivenessRecord {
                    outcome: Outcome::Unhelpful,
                    correction: true,
                    timestamp: now,
                    ..recent.record.clone()
                });
            }
            !retried
        });
        for correction in &corrections {
            state
                .stats
                .entry(correction.source)
                .or_default()
                .correct(now, config.half_life_secs);
        }
        records.extend(corrections);

        let mut matched = Vec::new();
        state.pending.retain(|pending| {
            if pending.session_id != event.session_id || pending.emitted_at > now {
                return true;
            }
            let tool_match = pending.tool_name == event.tool_name;
            let score = overlap(&pending.resources, &event.resources, tool_match);
            if score < config.min_overlap {
                return true;
            }
            let outcome = if event.success && !event.user_correction {
                Outcome::Followed
            } else {
                Outcome::Unhelpful
            };
            matched.push((
                EffectivenessRecord {
                    advice_id: pending.advice_id.clone(),
                    source: pending.source,
                    tool_name: Some(event.tool_name.clone()),
                    overlap: score,
                    outcome,
                    fallback: pending.fallback,
                    correction: false,
                    timestamp: now,
                },
                pending.resources.clone(),
            ));
            false
        });

        for (record, resources) in matched {
            state
                .stats
                .entry(record.source)
                .or_default()
                .observe(record.outcome, now, config.half_life_secs);
            if record.outcome == Outcome::Followed {
                state.recent.push(RecentFollow {
                    record: record.clone(),
                    session_id: event.session_id.clone(),
                    resources,
                    input_fingerprint: event.input_fingerprint.clone(),
                });
            }
            records.push(record);
        }

        if !records.is_empty() {
            state.dirty = true;
        }
        drop(state);
        self.append(&records);
        records
    }

    /// Expires pending entries older than the pending TTL at `now`.
    pub fn expire(&self, now: u64, config: &FeedbackConfig) -> Vec<EffectivenessRecord> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let records = expire_locked(&mut state, now, config);
        if !records.is_empty() {
            state.dirty = true;
        }
        drop(state);
        self.append(&records);
        records
    }

    /// Current ranking modifiers, decayed to `now`.
    #[must_use]
    pub fn modifiers(&self, now: u64, ranker: &RankerConfig, config: &FeedbackConfig) -> ModifierTable {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .stats
            .iter()
            .map(|(source, stats)| {
                let mut decayed = *stats;
                decayed.decay_to(now, config.half_life_secs);
                (*source, decayed.modifier(ranker))
            })
            .collect()
    }

    /// Snapshot of the raw statistics.
    #[must_use]
    pub fn stats(&self) -> BTreeMap<SourceKind, SourceStats> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats
            .clone()
    }

    /// Number of pending correlations.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }

    /// Writes statistics and pending entries if anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be replaced.
    pub fn flush(&self) -> Result<()> {
        // Snapshot under the lock; write without it so emissions and
        // modifier reads never wait on disk.
        let (stats, file) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            (
                state.stats.clone(),
                PendingFile {
                    pending: state.pending.clone(),
                    recent: state.recent.clone(),
                },
            )
        };

        let written = self.write_snapshot(&stats, &file);
        if written.is_err() {
            self.state.lock().unwrap_or_else(PoisonError::into_inner).dirty = true;
        }
        written
    }

    fn write_snapshot(
        &self,
        stats: &BTreeMap<SourceKind, SourceStats>,
        file: &PendingFile,
    ) -> Result<()> {
        if let Some(path) = &self.stats_path {
            write_json_atomic(path, stats)?;
        }
        if let Some(path) = &self.pending_path {
            write_json_atomic(path, file)?;
        }
        Ok(())
    }

    /// Whether state changed since the last successful flush.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).dirty
    }

    fn append(&self, records: &[EffectivenessRecord]) {
        for record in records {
            metrics::counter!("advisory_outcomes_total", "outcome" => record.outcome.as_str())
                .increment(1);
            if let Some(log) = &self.outcome_log
                && let Err(e) = log.append(record)
            {
                tracing::warn!(error = %e, "Failed to append outcome record");
            }
        }
    }
}

fn expire_locked(
    state: &mut FeedbackState,
    now: u64,
    config: &FeedbackConfig,
) -> Vec<EffectivenessRecord> {
    let mut expired = Vec::new();
    state.pending.retain(|pending| {
        let live = now <= pending.emitted_at.saturating_add(config.pending_ttl_secs);
        if !live {
            expired.push(EffectivenessRecord {
                advice_id: pending.advice_id.clone(),
                source: pending.source,
                tool_name: None,
                overlap: 0.0,
                outcome: Outcome::NoMatch,
                fallback: pending.fallback,
                correction: false,
                timestamp: now,
            });
        }
        live
    });
    for record in &expired {
        state
            .stats
            .entry(record.source)
            .or_default()
            .observe(Outcome::NoMatch, now, config.half_life_secs);
    }
    state
        .recent
        .retain(|r| now <= r.record.timestamp.saturating_add(config.correction_window_secs));
    expired
}

/// Resource overlap between an advised call and a follow-up.
///
/// Jaccard similarity over resources, where two references are equal if one
/// is a path suffix of the other. With no resources on either side the score
/// falls back to whether the tools match.
#[allow(clippy::cast_precision_loss)]
fn overlap(advised: &[String], followed: &[String], tool_match: bool) -> f32 {
    if advised.is_empty() && followed.is_empty() {
        return if tool_match { 1.0 } else { 0.0 };
    }
    let shared = advised
        .iter()
        .filter(|a| followed.iter().any(|b| resource_matches(a, b)))
        .count();
    let union = advised.len() + followed.len() - shared;
    if union == 0 {
        return 0.0;
    }
    shared as f32 / union as f32
}

#[allow(clippy::cast_precision_loss)]
fn gauge_value(n: usize) -> f64 {
    n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pending(text: &str, resources: &[&str], at: u64) -> PendingEmission {
        PendingEmission {
            advice_id: AdviceId::from_text(text),
            source: SourceKind::Rules,
            session_id: "s1".to_string(),
            tool_name: "Edit".to_string(),
            resources: resources.iter().map(|r| (*r).to_string()).collect(),
            fallback: false,
            emitted_at: at,
        }
    }

    fn outcome(tool: &str, resources: &[&str], success: bool, at: u64) -> OutcomeEvent {
        OutcomeEvent {
            session_id: "s1".to_string(),
            tool_name: tool.to_string(),
            resources: resources.iter().map(|r| (*r).to_string()).collect(),
            success,
            user_correction: false,
            input_fingerprint: None,
            timestamp: at,
        }
    }

    fn call(tool: &str, resources: &[&str], new_string: &str, at: u64) -> OutcomeEvent {
        OutcomeEvent {
            input_fingerprint: Some(format!("{tool}:{new_string}")),
            ..outcome(tool, resources, true, at)
        }
    }

    #[test]
    fn test_followed_on_matching_success() {
        let tracker = EffectivenessTracker::new();
        let config = FeedbackConfig::default();
        tracker.record_emission(pending("check audience", &["src/auth.rs"], 100));

        let records =
            tracker.record_outcome(&outcome("Edit", &["/repo/src/auth.rs"], true, 110), &config);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, Outcome::Followed);
        assert!((records[0].overlap - 1.0).abs() < f32::EPSILON);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_unhelpful_on_failure_then_retry() {
        let tracker = EffectivenessTracker::new();
        let config = FeedbackConfig::default();
        tracker.record_emission(pending("check audience", &["src/auth.rs"], 100));

        let records = tracker.record_outcome(&outcome("Edit", &["src/auth.rs"], false, 105), &config);
        assert_eq!(records[0].outcome, Outcome::Unhelpful);

        let stats = tracker.stats();
        assert!((stats[&SourceKind::Rules].unhelpful - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_retry_within_window_corrects_followed() {
        let tracker = EffectivenessTracker::new();
        let config = FeedbackConfig::default();
        tracker.record_emission(pending("check audience", &["src/auth.rs"], 100));

        let first = tracker.record_outcome(&call("Edit", &["src/auth.rs"], "a", 110), &config);
        assert_eq!(first[0].outcome, Outcome::Followed);

        let retry = tracker.record_outcome(
            &call("Edit", &["src/auth.rs"], "a", 110 + config.correction_window_secs),
            &config,
        );
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].outcome, Outcome::Unhelpful);
        assert!(retry[0].correction);

        let stats = tracker.stats()[&SourceKind::Rules];
        assert!(stats.followed < 1e-6);
        assert!((stats.unhelpful - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_different_successful_edit_keeps_follow() {
        let tracker = EffectivenessTracker::new();
        let config = FeedbackConfig::default();
        tracker.record_emission(pending("check audience", &["src/auth.rs"], 100));

        let first = tracker.record_outcome(&call("Edit", &["src/auth.rs"], "a", 105), &config);
        assert_eq!(first[0].outcome, Outcome::Followed);

        let next = tracker.record_outcome(&call("Edit", &["src/auth.rs"], "b", 115), &config);
        assert!(next.is_empty());

        let stats = tracker.stats()[&SourceKind::Rules];
        assert!(stats.unhelpful < 1e-6);
        assert!(stats.followed > 0.99);
    }

    #[test]
    fn test_failed_retry_corrects_follow() {
        let tracker = EffectivenessTracker::new();
        let config = FeedbackConfig::default();
        tracker.record_emission(pending("check audience", &["src/auth.rs"], 100));
        tracker.record_outcome(&call("Edit", &["src/auth.rs"], "a", 105), &config);

        let failed = OutcomeEvent {
            success: false,
            ..call("Edit", &["src/auth.rs"], "b", 115)
        };
        let records = tracker.record_outcome(&failed, &config);
        assert_eq!(records.len(), 1);
        assert!(records[0].correction);
        assert_eq!(records[0].outcome, Outcome::Unhelpful);
    }

    #[test]
    fn test_flush_releases_lock_and_clears_dirty() {
        let dir = TempDir::new().unwrap();
        let config = AdvisoryConfig::new().with_data_dir(dir.path());
        let tracker = EffectivenessTracker::open(&config);
        tracker.record_emission(pending("check audience", &["src/auth.rs"], 100));
        assert!(tracker.is_dirty());

        tracker.flush().unwrap();
        assert!(!tracker.is_dirty());
        assert!(config.stats_path().exists());
        assert!(config.pending_path().exists());
    }

    #[test]
    fn test_failed_flush_stays_dirty() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let config = AdvisoryConfig::new().with_data_dir(blocker.join("data"));
        let tracker = EffectivenessTracker::open(&config);
        tracker.record_emission(pending("check audience", &["src/auth.rs"], 100));

        assert!(tracker.flush().is_err());
        assert!(tracker.is_dirty());
    }

    #[test]
    fn test_retry_after_window_is_not_a_correction() {
        let tracker = EffectivenessTracker::new();
        let config = FeedbackConfig::default();
        tracker.record_emission(pending("check audience", &["src/auth.rs"], 100));
        tracker.record_outcome(&outcome("Edit", &["src/auth.rs"], true, 110), &config);

        let late = tracker.record_outcome(
            &outcome("Edit", &["src/auth.rs"], true, 111 + config.correction_window_secs),
            &config,
        );
        assert!(late.is_empty());
    }

    #[test]
    fn test_unrelated_outcome_leaves_pending() {
        let tracker = EffectivenessTracker::new();
        let config = FeedbackConfig::default();
        tracker.record_emission(pending("check audience", &["src/auth.rs"], 100));

        let records = tracker.record_outcome(&outcome("Read", &["README.md"], true, 105), &config);
        assert!(records.is_empty());
        assert_eq!(tracker.pending_count(), 1);
    }

    #[test]
    fn test_expiry_yields_no_match() {
        let tracker = EffectivenessTracker::new();
        let config = FeedbackConfig::default();
        tracker.record_emission(pending("check audience", &["src/auth.rs"], 100));

        assert!(tracker.expire(100 + config.pending_ttl_secs, &config).is_empty());
        let expired = tracker.expire(101 + config.pending_ttl_secs, &config);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].outcome, Outcome::NoMatch);

        // no_match is not a negative signal.
        let modifiers = tracker.modifiers(200, &RankerConfig::default(), &config);
        assert!((modifiers[&SourceKind::Rules] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_other_session_does_not_correlate() {
        let tracker = EffectivenessTracker::new();
        let config = FeedbackConfig::default();
        tracker.record_emission(pending("check audience", &["src/auth.rs"], 100));

        let mut event = outcome("Edit", &["src/auth.rs"], true, 105);
        event.session_id = "s2".to_string();
        assert!(tracker.record_outcome(&event, &config).is_empty());
    }

    #[test]
    fn test_modifiers_reward_followed_sources() {
        let tracker = EffectivenessTracker::new();
        let config = FeedbackConfig::default();
        for i in 0..5 {
            let text = format!("advice {i}");
            tracker.record_emission(pending(&text, &["src/a.rs"], 100));
        }
        tracker.record_outcome(&outcome("Edit", &["src/a.rs"], true, 101), &config);

        let modifier = tracker.modifiers(101, &RankerConfig::default(), &config)[&SourceKind::Rules];
        assert!(modifier > 1.0 && modifier <= 1.1);
    }

    #[test]
    fn test_overlap_without_resources_uses_tool() {
        assert!((overlap(&[], &[], true) - 1.0).abs() < f32::EPSILON);
        assert!(overlap(&[], &[], false).abs() < f32::EPSILON);
        let a = vec!["a.rs".to_string(), "b.rs".to_string()];
        let b = vec!["b.rs".to_string(), "c.rs".to_string()];
        assert!((overlap(&a, &b, false) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_flush_and_reopen() {
        let dir = TempDir::new().unwrap();
        let config = AdvisoryConfig::new().with_data_dir(dir.path());
        let tracker = EffectivenessTracker::open(&config);
        tracker.record_emission(pending("check audience", &["src/auth.rs"], 100));
        tracker.record_emission(pending("rotate keys", &["src/keys.rs"], 100));
        tracker.record_outcome(&outcome("Edit", &["src/auth.rs"], true, 110), &config.feedback);
        tracker.flush().unwrap();

        let reopened = EffectivenessTracker::open(&config);
        assert_eq!(reopened.pending_count(), 1);
        assert!((reopened.stats()[&SourceKind::Rules].followed - 1.0).abs() < 1e-6);

        let log = AppendLog::new(config.outcome_log_path());
        let records: Vec<EffectivenessRecord> = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
    }
}
