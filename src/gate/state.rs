//! Per-session gate state.

use crate::config::GateConfig;
use crate::models::{AdviceId, Survivor};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Suppression memory for one session.
///
/// Read by [`SuppressionGate::evaluate`](super::SuppressionGate::evaluate);
/// mutated only through the emission tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateState {
    /// Advice identity → last time shown in this session.
    #[serde(default)]
    pub shown: HashMap<AdviceId, u64>,
    /// Tool name → last time advice was emitted for it.
    #[serde(default)]
    pub tool_emissions: HashMap<String, u64>,
    /// Timestamps of recent emissions, one per emitted survivor.
    #[serde(default)]
    pub window: VecDeque<u64>,
    /// Recent budget-exhausted calls, `true` where a fallback was emitted.
    #[serde(default)]
    pub exhausted_calls: VecDeque<bool>,
}

impl GateState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emissions within the rolling window ending at `now`.
    #[must_use]
    pub fn emissions_in_window(&self, now: u64, window_secs: u64) -> usize {
        let start = now.saturating_sub(window_secs);
        self.window.iter().filter(|t| **t > start).count()
    }

    /// Whether a fallback may be emitted on the next budget-exhausted call.
    ///
    /// Allowed only if none of the previous `interval - 1` budget-exhausted
    /// calls emitted one.
    #[must_use]
    pub fn fallback_allowed(&self, interval: usize) -> bool {
        let lookback = interval.saturating_sub(1);
        !self.exhausted_calls.iter().rev().take(lookback).any(|used| *used)
    }

    /// Returns true if `id` was shown at most `ttl` seconds before `now`.
    #[must_use]
    pub fn shown_within(&self, id: &AdviceId, ttl: u64, now: u64) -> bool {
        self.shown
            .get(id)
            .is_some_and(|shown| now <= shown.saturating_add(ttl))
    }

    /// Returns true if `tool` emitted at most `cooldown` seconds before `now`.
    #[must_use]
    pub fn tool_cooling(&self, tool: &str, cooldown: u64, now: u64) -> bool {
        self.tool_emissions
            .get(tool)
            .is_some_and(|last| now <= last.saturating_add(cooldown))
    }

    /// Records emitted survivors for `tool`.
    pub(crate) fn record_emission(&mut self, survivors: &[Survivor], tool: &str, now: u64) {
        if survivors.is_empty() {
            return;
        }
        for survivor in survivors {
            self.shown.insert(survivor.scored.advice_id.clone(), now);
            self.window.push_back(now);
        }
        self.tool_emissions.insert(tool.to_string(), now);
    }

    /// Records one budget-exhausted call.
    pub(crate) fn record_exhausted(&mut self, fallback_used: bool, interval: usize) {
        self.exhausted_calls.push_back(fallback_used);
        while self.exhausted_calls.len() > interval.max(1) {
            self.exhausted_calls.pop_front();
        }
    }

    /// Drops entries that can no longer suppress anything.
    pub(crate) fn prune(&mut self, now: u64, config: &GateConfig) {
        let max_ttl = config
            .source_shown_ttl_secs
            .values()
            .copied()
            .fold(config.shown_ttl_secs, u64::max);
        self.shown
            .retain(|_, shown| now <= shown.saturating_add(max_ttl));
        self.tool_emissions
            .retain(|_, last| now <= last.saturating_add(config.tool_cooldown_secs));
        let start = now.saturating_sub(config.window_secs);
        while self.window.front().is_some_and(|t| *t <= start) {
            self.window.pop_front();
        }
    }
}

/// Cross-session record of when each identity was last emitted, and where.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalDedup {
    /// Advice identity → (session, timestamp) of the latest emission.
    #[serde(default)]
    pub entries: HashMap<AdviceId, (String, u64)>,
}

impl GlobalDedup {
    /// Returns true if another session emitted `id` within `horizon` of `now`.
    #[must_use]
    pub fn emitted_elsewhere(&self, id: &AdviceId, session_id: &str, horizon: u64, now: u64) -> bool {
        self.entries.get(id).is_some_and(|(session, at)| {
            session != session_id && now <= at.saturating_add(horizon)
        })
    }

    /// Records emitted survivors for a session.
    pub(crate) fn record(&mut self, survivors: &[Survivor], session_id: &str, now: u64) {
        for survivor in survivors {
            self.entries.insert(
                survivor.scored.advice_id.clone(),
                (session_id.to_string(), now),
            );
        }
    }

    /// Drops entries older than `horizon`.
    pub(crate) fn prune(&mut self, now: u64, horizon: u64) {
        self.entries
            .retain(|_, (_, at)| now <= at.saturating_add(horizon));
    }
}
