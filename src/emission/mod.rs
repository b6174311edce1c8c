//! Emission and tracking.
//!
//! The only writer of gate state. [`EmissionTracker::claim`] commits a gate
//! outcome under the session lock: identities shown by a concurrent call
//! since the gate ran are dropped, then the shown map, tool cooldowns,
//! rolling window and cross-session dedup map are all updated before the
//! lock is released. Decisions are appended to the emission audit log.

mod session;

pub use session::{SessionRecord, SessionTrail};

use crate::config::{AdvisoryConfig, GateConfig};
use crate::gate::{GateOutcome, GateState, GlobalDedup};
use crate::models::{DecisionRecord, Survivor, ToolEvent};
use crate::storage::{AppendLog, read_json, write_json_atomic};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Sessions kept in memory.
const SESSION_CAPACITY: NonZeroUsize = match NonZeroUsize::new(256) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// Read-only view handed to the gate.
#[derive(Debug, Clone, Default)]
pub struct GateSnapshot {
    /// Session gate state.
    pub state: GateState,
    /// Cross-session dedup map.
    pub global: GlobalDedup,
}

/// Tracks what was shown and keeps the audit trail.
pub struct EmissionTracker {
    sessions: Mutex<LruCache<String, Arc<Mutex<SessionRecord>>>>,
    global: Mutex<GlobalDedup>,
    emission_log: Option<AppendLog>,
    sessions_dir: Option<PathBuf>,
    global_path: Option<PathBuf>,
}

impl std::fmt::Debug for EmissionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmissionTracker")
            .field("sessions_dir", &self.sessions_dir)
            .field("global_path", &self.global_path)
            .finish_non_exhaustive()
    }
}

impl Default for EmissionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl EmissionTracker {
    /// Creates an in-memory tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(LruCache::new(SESSION_CAPACITY)),
            global: Mutex::new(GlobalDedup::default()),
            emission_log: None,
            sessions_dir: None,
            global_path: None,
        }
    }

    /// Opens the tracker over the data directory.
    #[must_use]
    pub fn open(config: &AdvisoryConfig) -> Self {
        let global_path = config.global_dedup_path();
        let global = read_json::<GlobalDedup>(&global_path)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Discarding unreadable global dedup map");
                None
            })
            .unwrap_or_default();
        Self {
            sessions: Mutex::new(LruCache::new(SESSION_CAPACITY)),
            global: Mutex::new(global),
            emission_log: Some(AppendLog::new(config.emission_log_path())),
            sessions_dir: Some(config.sessions_dir()),
            global_path: Some(global_path),
        }
    }

    fn session(&self, session_id: &str) -> Arc<Mutex<SessionRecord>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(record) = sessions.get(session_id) {
            return Arc::clone(record);
        }
        let record = Arc::new(Mutex::new(self.load_session(session_id)));
        sessions.put(session_id.to_string(), Arc::clone(&record));
        record
    }

    fn load_session(&self, session_id: &str) -> SessionRecord {
        let Some(dir) = &self.sessions_dir else {
            return SessionRecord::default();
        };
        read_json(&dir.join(session::file_name(session_id)))
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Discarding unreadable session record");
                None
            })
            .unwrap_or_default()
    }

    fn persist_session(&self, session_id: &str, record: &SessionRecord) {
        if let Some(dir) = &self.sessions_dir
            && let Err(e) = write_json_atomic(&dir.join(session::file_name(session_id)), record)
        {
            tracing::warn!(error = %e, "Failed to persist session record");
        }
    }

    /// Gate state and dedup map as of now.
    #[must_use]
    pub fn snapshot(&self, session_id: &str) -> GateSnapshot {
        let state = self
            .session(session_id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gate
            .clone();
        let global = self
            .global
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        GateSnapshot { state, global }
    }

    /// The session's recent activity.
    #[must_use]
    pub fn trail(&self, session_id: &str) -> SessionTrail {
        self.session(session_id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .trail
            .clone()
    }

    /// Folds an event into the session trail.
    pub fn observe(&self, event: &ToolEvent) {
        let handle = self.session(&event.session_id);
        let mut record = handle.lock().unwrap_or_else(PoisonError::into_inner);
        let before = record.trail.clone();
        record.trail.observe(event);
        if record.trail != before {
            self.persist_session(&event.session_id, &record);
        }
    }

    /// Commits a gate outcome and returns the survivors actually emitted.
    #[tracing::instrument(skip_all, fields(session = %session_id, tool = %tool))]
    pub fn claim(
        &self,
        session_id: &str,
        tool: &str,
        outcome: GateOutcome,
        now: u64,
        config: &GateConfig,
    ) -> Vec<Survivor> {
        let handle = self.session(session_id);
        let mut record = handle.lock().unwrap_or_else(PoisonError::into_inner);

        let mut survivors = outcome.survivors;
        survivors.retain(|s| {
            let ttl = config.shown_ttl_for(s.scored.candidate.source);
            let raced = record.gate.shown_within(&s.scored.advice_id, ttl, now);
            if raced {
                tracing::debug!(advice_id = %s.scored.advice_id, "Dropping identity emitted concurrently");
                metrics::counter!("advisory_gate_drops_total", "reason" => "concurrent").increment(1);
            }
            !raced
        });

        let fallback_used = outcome.fallback_used && !survivors.is_empty();
        if outcome.budget_exhausted {
            record.gate.record_exhausted(fallback_used, config.fallback_interval);
        }
        record.gate.record_emission(&survivors, tool, now);
        record.gate.prune(now, config);

        if !survivors.is_empty() {
            let mut global = self.global.lock().unwrap_or_else(PoisonError::into_inner);
            global.record(&survivors, session_id, now);
            global.prune(now, config.global_dedup_secs);
            if let Some(path) = &self.global_path
                && let Err(e) = write_json_atomic(path, &*global)
            {
                tracing::warn!(error = %e, "Failed to persist global dedup map");
            }
        }

        if outcome.budget_exhausted || !survivors.is_empty() {
            self.persist_session(session_id, &record);
        }
        drop(record);

        metrics::counter!("advisory_emitted_total").increment(survivors.len() as u64);
        survivors
    }

    /// Appends a decision to the audit log.
    pub fn record_decision(&self, decision: &DecisionRecord) {
        if let Some(log) = &self.emission_log
            && let Err(e) = log.append(decision)
        {
            tracing::warn!(error = %e, "Failed to append decision record");
        }
    }

    /// Prunes in-memory state that can no longer suppress anything.
    pub fn sweep(&self, now: u64, config: &GateConfig) {
        let mut global = self.global.lock().unwrap_or_else(PoisonError::into_inner);
        global.prune(now, config.global_dedup_secs);
        drop(global);

        let handles: Vec<_> = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handle)| Arc::clone(handle))
            .collect();
        for handle in handles {
            handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .gate
                .prune(now, config);
        }
    }
}
