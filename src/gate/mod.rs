//! Suppression gate.
//!
//! Decides which authority-tagged candidates may be shown on this call. The
//! gate is a pure function of its inputs: candidates, the session's
//! [`GateState`], the cross-session [`GlobalDedup`] map, the tool name and
//! `now`. It never mutates state.
//!
//! # Filter order
//!
//! 1. Per-source shown-TTL (same identity recently shown in this session)
//! 2. Tool cooldown
//! 3. Cross-session dedup
//! 4. Optional WHISPER suppression
//! 5. Truncation to the remaining budget, highest authority first
//! 6. Rate-limited fallback when the budget is exhausted and nothing survives

mod state;

pub use state::{GateState, GlobalDedup};

use crate::config::GateConfig;
use crate::models::{AdviceId, AuthorityTier, Survivor};
use std::fmt;

/// Why a candidate was not emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Shown in this session within its source's shown-TTL.
    RecentlyShown,
    /// The tool is cooling down after a previous emission.
    ToolCooldown,
    /// Emitted by another session within the dedup horizon.
    GlobalDuplicate,
    /// WHISPER suppression is enabled.
    Whisper,
    /// Cut by the emission budget.
    Budget,
}

impl DropReason {
    /// Returns the reason as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RecentlyShown => "recently_shown",
            Self::ToolCooldown => "tool_cooldown",
            Self::GlobalDuplicate => "global_duplicate",
            Self::Whisper => "whisper",
            Self::Budget => "budget",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of gating one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateOutcome {
    /// Candidates to emit, highest authority first.
    pub survivors: Vec<Survivor>,
    /// Candidates filtered out, with the first filter that removed them.
    pub dropped: Vec<(AdviceId, DropReason)>,
    /// True when eligible candidates existed but no budget remained.
    pub budget_exhausted: bool,
    /// True when the survivor list is a fallback emission.
    pub fallback_used: bool,
}

impl GateOutcome {
    /// Returns true if nothing will be emitted.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        self.survivors.is_empty()
    }
}

/// Deterministic filter and authority ordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuppressionGate;

impl SuppressionGate {
    /// Creates a gate.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Evaluates `candidates` for `tool` in `session_id` at `now`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &self,
        candidates: &[Survivor],
        state: &GateState,
        global: &GlobalDedup,
        session_id: &str,
        tool: &str,
        now: u64,
        config: &GateConfig,
    ) -> GateOutcome {
        let mut outcome = GateOutcome::default();
        let tool_cooling = state.tool_cooling(tool, config.tool_cooldown_secs, now);

        let mut eligible: Vec<Survivor> = Vec::new();
        for candidate in candidates {
            if !candidate.tier.is_emittable() {
                continue;
            }
            let id = &candidate.scored.advice_id;
            let ttl = config.shown_ttl_for(candidate.scored.candidate.source);
            let reason = if state.shown_within(id, ttl, now) {
                Some(DropReason::RecentlyShown)
            } else if tool_cooling {
                Some(DropReason::ToolCooldown)
            } else if global.emitted_elsewhere(id, session_id, config.global_dedup_secs, now) {
                Some(DropReason::GlobalDuplicate)
            } else if config.suppress_whispers && candidate.tier == AuthorityTier::Whisper {
                Some(DropReason::Whisper)
            } else {
                None
            };
            match reason {
                Some(reason) => outcome.dropped.push((id.clone(), reason)),
                None => {
                    let mut survivor = candidate.clone();
                    survivor.fallback = false;
                    eligible.push(survivor);
                },
            }
        }

        // Stable sort keeps ranked order within a tier.
        eligible.sort_by(|a, b| {
            b.tier
                .cmp(&a.tier)
                .then_with(|| b.scored.score.total_cmp(&a.scored.score))
        });

        let window_remaining = config
            .window_max_emissions
            .saturating_sub(state.emissions_in_window(now, config.window_secs));
        let budget = config.emission_budget.min(window_remaining);

        if budget == 0 && !eligible.is_empty() {
            outcome.budget_exhausted = true;
            // The fallback replaces a window-exhausted budget, never a zero one.
            if config.fallback_enabled
                && config.emission_budget > 0
                && state.fallback_allowed(config.fallback_interval)
            {
                let mut fallback = eligible.remove(0);
                fallback.fallback = true;
                outcome.survivors.push(fallback);
                outcome.fallback_used = true;
            }
        } else {
            let cut = eligible.len().min(budget);
            outcome.survivors = eligible.drain(..cut).collect();
        }
        outcome.dropped.extend(
            eligible
                .into_iter()
                .map(|s| (s.scored.advice_id, DropReason::Budget)),
        );

        for (_, reason) in &outcome.dropped {
            metrics::counter!("advisory_gate_drops_total", "reason" => reason.as_str()).increment(1);
        }
        tracing::debug!(
            survivors = outcome.survivors.len(),
            dropped = outcome.dropped.len(),
            budget_exhausted = outcome.budget_exhausted,
            fallback = outcome.fallback_used,
            "Gate evaluated"
        );
        outcome
    }
}
