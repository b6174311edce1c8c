//! Fusion ranking.
//!
//! Candidates from every source are scored with one additive formula,
//! adjusted by a bounded per-source effectiveness modifier, deduplicated by
//! advice identity and cut to the top K.
//!
//! ```text
//! base  = w_r * relevance + w_q * quality + w_t * trust     (inputs clamped to [0, 1])
//! score = clamp(base * modifier(source), 0, 1)              (modifier in [min, max])
//! ```

mod intent;

pub use intent::{Intent, IntentClassifier};

use crate::config::RankerConfig;
use crate::models::{
    AdviceContext, AdviceId, Lineage, MatchConfidence, ScoredCandidate, SourceContribution,
    SourceKind,
};
use crate::sources::{SourceRegistry, SourceResults};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Per-source effectiveness modifiers. Missing sources are neutral (1.0).
pub type ModifierTable = BTreeMap<SourceKind, f32>;

/// Output of one ranking pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    /// Top-K candidates, strongest first.
    pub ranked: Vec<ScoredCandidate>,
    /// Per-source contributions and skipped sources.
    pub lineage: Lineage,
}

/// Queries sources and fuses their candidates into one ranked list.
#[derive(Debug, Clone, Default)]
pub struct FusionRanker {
    registry: SourceRegistry,
}

impl FusionRanker {
    /// Creates a ranker over `registry`.
    #[must_use]
    pub const fn new(registry: SourceRegistry) -> Self {
        Self { registry }
    }

    /// Returns the source registry.
    #[must_use]
    pub const fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Queries all sources within the per-source budget and ranks the result.
    #[tracing::instrument(skip_all, fields(tool = %context.tool_name, intent = %context.intent))]
    pub fn rank(
        &self,
        context: &AdviceContext,
        config: &RankerConfig,
        modifiers: &ModifierTable,
    ) -> Ranking {
        let budget = Duration::from_millis(config.source_timeout_ms);
        let results = self.registry.query_all(context, budget);
        let ranking = Self::fuse(&results, config, modifiers);

        tracing::debug!(
            candidates = results.candidate_count(),
            ranked = ranking.ranked.len(),
            skipped = results.skipped.len(),
            "Ranked candidates"
        );
        ranking
    }

    /// Scores one candidate's inputs.
    #[must_use]
    pub fn base_score(relevance: f32, quality: f32, trust: f32, config: &RankerConfig) -> f32 {
        let w = &config.weights;
        w.trust.mul_add(
            trust.clamp(0.0, 1.0),
            w.relevance
                .mul_add(relevance.clamp(0.0, 1.0), w.quality * quality.clamp(0.0, 1.0)),
        )
    }

    /// Fuses source results into a ranked list. Pure.
    #[must_use]
    pub fn fuse(results: &SourceResults, config: &RankerConfig, modifiers: &ModifierTable) -> Ranking {
        let mut best: HashMap<AdviceId, ScoredCandidate> = HashMap::new();
        let mut contributions: BTreeMap<SourceKind, SourceContribution> = BTreeMap::new();

        for response in &results.responses {
            let modifier = modifiers
                .get(&response.kind)
                .copied()
                .unwrap_or(1.0)
                .clamp(config.modifier_min, config.modifier_max);
            let contribution = contributions
                .entry(response.kind)
                .or_insert_with(|| SourceContribution {
                    source: response.kind,
                    returned: 0,
                    ranked: 0,
                    best_score: 0.0,
                });

            for candidate in &response.candidates {
                let base = Self::base_score(
                    candidate.relevance,
                    candidate.quality,
                    candidate.trust,
                    config,
                );
                let score = (base * modifier).clamp(0.0, 1.0);
                contribution.returned += 1;
                contribution.best_score = contribution.best_score.max(score);

                let scored = ScoredCandidate {
                    advice_id: candidate.identity(),
                    candidate: candidate.clone(),
                    base_score: base,
                    modifier,
                    score,
                };
                let replace = best
                    .get(&scored.advice_id)
                    .is_none_or(|existing| compare(&scored, existing) == Ordering::Greater);
                if replace {
                    best.insert(scored.advice_id.clone(), scored);
                }
            }
        }

        let mut ranked: Vec<ScoredCandidate> = best.into_values().collect();
        ranked.sort_by(|a, b| compare(b, a));
        ranked.truncate(config.top_k);

        for scored in &ranked {
            if let Some(c) = contributions.get_mut(&scored.candidate.source) {
                c.ranked += 1;
            }
        }

        Ranking {
            ranked,
            lineage: Lineage {
                contributions: contributions.into_values().collect(),
                skipped: results.skipped.clone(),
                confidence: MatchConfidence::Exact,
            },
        }
    }
}

/// Total order used for ranking: score, then trust, then recency.
///
/// Remaining ties are broken by source kind and identity so the order never
/// depends on hash iteration.
fn compare(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| a.candidate.trust.total_cmp(&b.candidate.trust))
        .then_with(|| a.candidate.observed_at.cmp(&b.candidate.observed_at))
        .then_with(|| b.candidate.source.cmp(&a.candidate.source))
        .then_with(|| b.advice_id.cmp(&a.advice_id))
}
