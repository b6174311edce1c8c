//! Effectiveness records.

use super::{AdviceId, SourceKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of what happened after advice was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The follow-up call touched the advised resources and succeeded.
    Followed,
    /// The follow-up call failed or was immediately retried by the user.
    Unhelpful,
    /// No follow-up correlated within the pending window. Not a negative signal.
    NoMatch,
}

impl Outcome {
    /// Returns the outcome as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Followed => "followed",
            Self::Unhelpful => "unhelpful",
            Self::NoMatch => "no_match",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable correlation between an emitted candidate and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessRecord {
    /// Identity of the emitted advice.
    pub advice_id: AdviceId,
    /// Source that proposed it.
    pub source: SourceKind,
    /// Tool whose outcome was correlated.
    #[serde(default)]
    pub tool_name: Option<String>,
    /// Resource overlap between advice and follow-up, in [0, 1].
    pub overlap: f32,
    /// Classification.
    pub outcome: Outcome,
    /// Whether the emission came through the gate's fallback path.
    #[serde(default)]
    pub fallback: bool,
    /// Whether this record corrects an earlier `followed` record after a
    /// same-tool retry.
    #[serde(default)]
    pub correction: bool,
    /// Record time (Unix seconds).
    pub timestamp: u64,
}
