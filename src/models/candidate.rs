//! Candidate advice proposals.

use super::{AdviceId, SourceKind};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One proposed piece of advice from one source.
///
/// Candidates are constructed per ranking pass. They are persisted only as
/// part of a [`Packet`](super::Packet), never standalone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Source that proposed the advice.
    pub source: SourceKind,
    /// Raw relevance to the current context, in [0, 1].
    pub relevance: f32,
    /// Source-intrinsic quality, in [0, 1].
    pub quality: f32,
    /// Trust in the source, in [0, 1].
    pub trust: f32,
    /// Advice payload.
    pub text: String,
    /// Resource references (usually file paths) used for invalidation and
    /// outcome correlation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    /// When the underlying knowledge was last observed (Unix seconds).
    #[serde(default)]
    pub observed_at: u64,
    /// Whether this is hard-safety advice eligible for the `BLOCK` tier.
    #[serde(default)]
    pub safety_critical: bool,
}

impl Candidate {
    /// Creates a candidate with neutral scores.
    #[must_use]
    pub fn new(source: SourceKind, text: impl Into<String>) -> Self {
        Self {
            source,
            relevance: 0.5,
            quality: 0.5,
            trust: 0.5,
            text: text.into(),
            resources: Vec::new(),
            observed_at: 0,
            safety_critical: false,
        }
    }

    /// Sets relevance, quality and trust.
    #[must_use]
    pub const fn with_scores(mut self, relevance: f32, quality: f32, trust: f32) -> Self {
        self.relevance = relevance;
        self.quality = quality;
        self.trust = trust;
        self
    }

    /// Sets the resource references.
    #[must_use]
    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the observation timestamp.
    #[must_use]
    pub const fn with_observed_at(mut self, observed_at: u64) -> Self {
        self.observed_at = observed_at;
        self
    }

    /// Marks the candidate as hard-safety advice.
    #[must_use]
    pub const fn safety_critical(mut self) -> Self {
        self.safety_critical = true;
        self
    }

    /// Returns the advice identity of this candidate.
    #[must_use]
    pub fn identity(&self) -> AdviceId {
        AdviceId::from_text(&self.text)
    }

    /// Checks that the candidate is well formed.
    ///
    /// Scores may be out of range (they are clamped during ranking) but must
    /// be finite, and the payload must contain text.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::InvalidInput("candidate text is empty".to_string()));
        }
        for (name, value) in [
            ("relevance", self.relevance),
            ("quality", self.quality),
            ("trust", self.trust),
        ] {
            if !value.is_finite() {
                return Err(Error::InvalidInput(format!(
                    "candidate {name} is not finite: {value}"
                )));
            }
        }
        Ok(())
    }
}

/// A candidate with its composite ranking score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    /// The underlying candidate.
    pub candidate: Candidate,
    /// Identity used for dedup and suppression.
    pub advice_id: AdviceId,
    /// Additive base score before the effectiveness modifier.
    pub base_score: f32,
    /// Effectiveness modifier applied to the base score.
    pub modifier: f32,
    /// Final composite score.
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let c = Candidate::new(SourceKind::Rules, "Use parameterized queries")
            .with_scores(0.9, 0.8, 0.7)
            .with_resources(["src/db.rs"])
            .with_observed_at(42)
            .safety_critical();

        assert!((c.relevance - 0.9).abs() < f32::EPSILON);
        assert_eq!(c.resources, vec!["src/db.rs".to_string()]);
        assert_eq!(c.observed_at, 42);
        assert!(c.safety_critical);
    }

    #[test]
    fn test_validate_rejects_empty_text() {
        let c = Candidate::new(SourceKind::Rules, "   ");
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nan() {
        let c = Candidate::new(SourceKind::Rules, "text").with_scores(f32::NAN, 0.5, 0.5);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_allows_out_of_range() {
        let c = Candidate::new(SourceKind::Rules, "text").with_scores(1.7, -0.2, 0.5);
        assert!(c.validate().is_ok());
    }
}
