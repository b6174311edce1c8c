//! Authority tiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity/confidence level assigned to a surviving candidate.
///
/// Variants are declared from weakest to strongest so the derived `Ord`
/// sorts `Block` highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthorityTier {
    /// Below the whisper threshold; always dropped.
    Silent,
    /// Low confidence, suppressible.
    Whisper,
    /// The common case.
    Note,
    /// Strong advice.
    Warning,
    /// Hard-safety advice that may halt an action.
    Block,
}

/// Score thresholds for each tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    /// Minimum score for `BLOCK`.
    pub block: f32,
    /// Minimum score for `WARNING`.
    pub warning: f32,
    /// Minimum score for `NOTE`.
    pub note: f32,
    /// Minimum score for `WHISPER`.
    pub whisper: f32,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            block: 0.95,
            warning: 0.80,
            note: 0.48,
            whisper: 0.27,
        }
    }
}

impl AuthorityTier {
    /// Classifies a score.
    ///
    /// Only safety-critical advice can reach `BLOCK`; anything else scoring
    /// at or above the block threshold is capped at `WARNING`.
    #[must_use]
    pub fn classify(score: f32, safety_critical: bool, thresholds: &TierThresholds) -> Self {
        if score >= thresholds.block && safety_critical {
            Self::Block
        } else if score >= thresholds.warning {
            Self::Warning
        } else if score >= thresholds.note {
            Self::Note
        } else if score >= thresholds.whisper {
            Self::Whisper
        } else {
            Self::Silent
        }
    }

    /// Returns the tier as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Silent => "SILENT",
            Self::Whisper => "WHISPER",
            Self::Note => "NOTE",
            Self::Warning => "WARNING",
            Self::Block => "BLOCK",
        }
    }

    /// Whether this tier is ever emitted.
    #[must_use]
    pub const fn is_emittable(&self) -> bool {
        !matches!(self, Self::Silent)
    }
}

impl fmt::Display for AuthorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.99, true, AuthorityTier::Block; "block when safety critical")]
    #[test_case(0.99, false, AuthorityTier::Warning; "block capped without safety flag")]
    #[test_case(0.95, true, AuthorityTier::Block; "block boundary")]
    #[test_case(0.80, false, AuthorityTier::Warning; "warning boundary")]
    #[test_case(0.79, false, AuthorityTier::Note; "just below warning")]
    #[test_case(0.48, false, AuthorityTier::Note; "note boundary")]
    #[test_case(0.47, false, AuthorityTier::Whisper; "just below note")]
    #[test_case(0.27, false, AuthorityTier::Whisper; "whisper boundary")]
    #[test_case(0.26, true, AuthorityTier::Silent; "silent")]
    fn test_classify(score: f32, safety: bool, expected: AuthorityTier) {
        assert_eq!(
            AuthorityTier::classify(score, safety, &TierThresholds::default()),
            expected
        );
    }

    #[test]
    fn test_ordering() {
        assert!(AuthorityTier::Block > AuthorityTier::Warning);
        assert!(AuthorityTier::Warning > AuthorityTier::Note);
        assert!(AuthorityTier::Note > AuthorityTier::Whisper);
        assert!(AuthorityTier::Whisper > AuthorityTier::Silent);
    }

    #[test]
    fn test_serde_uppercase() {
        let json = serde_json::to_string(&AuthorityTier::Warning).unwrap();
        assert_eq!(json, "\"WARNING\"");
    }
}
