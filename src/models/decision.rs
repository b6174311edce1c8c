//! Machine-readable decision records for the emission audit log.

use super::{AdviceId, AuthorityTier, EventKind, Lineage, SourceKind, Survivor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the ranked list for a decision was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDisposition {
    /// Exact cache hit.
    ExactHit,
    /// Relaxed cache hit.
    RelaxedHit,
    /// Cache miss, ranked live.
    Miss,
}

impl CacheDisposition {
    /// Returns the disposition as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ExactHit => "exact_hit",
            Self::RelaxedHit => "relaxed_hit",
            Self::Miss => "miss",
        }
    }
}

/// One emitted survivor in a decision record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEntry {
    /// Advice identity.
    pub advice_id: AdviceId,
    /// Source attribution.
    pub source: SourceKind,
    /// Authority tier.
    pub tier: AuthorityTier,
    /// Composite score.
    pub score: f32,
    /// Whether the gate's fallback admitted it.
    pub fallback: bool,
}

impl From<&Survivor> for DecisionEntry {
    fn from(survivor: &Survivor) -> Self {
        Self {
            advice_id: survivor.scored.advice_id.clone(),
            source: survivor.scored.candidate.source,
            tier: survivor.tier,
            score: survivor.scored.score,
            fallback: survivor.fallback,
        }
    }
}

/// Audit record of one emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Unique decision ID.
    pub id: String,
    /// Wall-clock time of the decision.
    pub recorded_at: DateTime<Utc>,
    /// Host session.
    pub session_id: String,
    /// Event that triggered the decision.
    pub event: EventKind,
    /// Tool name.
    pub tool_name: String,
    /// Cache key used.
    pub cache_key: String,
    /// Cache disposition.
    pub cache: CacheDisposition,
    /// Emitted survivors, strongest first.
    pub entries: Vec<DecisionEntry>,
    /// Full lineage of the ranked list.
    pub lineage: Lineage,
    /// Whether generative refinement produced the text.
    pub refined: bool,
    /// Rendered length in characters.
    pub rendered_chars: usize,
    /// Hot-path latency in milliseconds.
    pub latency_ms: u64,
}

impl DecisionRecord {
    /// Highest tier among the entries.
    #[must_use]
    pub fn top_tier(&self) -> Option<AuthorityTier> {
        self.entries.iter().map(|e| e.tier).max()
    }
}
