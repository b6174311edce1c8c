//! Registry of candidate sources with time-boxed fan-out.

use super::CandidateSource;
use crate::models::{AdviceContext, Candidate, SourceKind};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Candidates returned by one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceResponse {
    /// Source kind.
    pub kind: SourceKind,
    /// Well-formed candidates, in source order.
    pub candidates: Vec<Candidate>,
}

/// Outcome of querying every registered source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceResults {
    /// Responses in [`SourceKind`] order.
    pub responses: Vec<SourceResponse>,
    /// Sources that failed or missed the deadline.
    pub skipped: Vec<SourceKind>,
}

impl SourceResults {
    /// Total number of candidates across responses.
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.responses.iter().map(|r| r.candidates.len()).sum()
    }
}

/// Sources keyed by kind. At most one source per kind.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<SourceKind, Arc<dyn CandidateSource>>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl SourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source, replacing any source of the same kind.
    #[must_use]
    pub fn with_source(mut self, source: impl CandidateSource + 'static) -> Self {
        self.register(Arc::new(source));
        self
    }

    /// Registers a shared source, replacing any source of the same kind.
    pub fn register(&mut self, source: Arc<dyn CandidateSource>) {
        self.sources.insert(source.kind(), source);
    }

    /// Registered kinds in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<SourceKind> {
        self.sources.keys().copied().collect()
    }

    /// Number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if no sources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Queries every source in parallel, waiting at most `budget`.
    ///
    /// Each source runs on its own thread. Sources that error, return
    /// malformed candidates only, or miss the deadline contribute nothing.
    /// Threads that miss the deadline are abandoned and finish on their own.
    #[tracing::instrument(skip(self, context), fields(sources = self.sources.len(), tool = %context.tool_name))]
    pub fn query_all(&self, context: &AdviceContext, budget: Duration) -> SourceResults {
        let deadline = Instant::now() + budget;
        let (tx, rx) = mpsc::channel();
        let mut pending = BTreeSet::new();
        let mut results = SourceResults::default();

        for (kind, source) in &self.sources {
            let kind = *kind;
            let tx = tx.clone();
            let source = Arc::clone(source);
            let context = context.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("advisory-source-{kind}"))
                .spawn(move || {
                    let result = source.query(&context);
                    // Receiver is gone once the deadline passes.
                    let _ = tx.send((kind, result));
                });
            match spawned {
                Ok(_) => {
                    pending.insert(kind);
                },
                Err(e) => {
                    tracing::warn!(source = %kind, error = %e, "Failed to spawn source query");
                    results.skipped.push(kind);
                },
            }
        }
        drop(tx);

        let mut responses = BTreeMap::new();
        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok((kind, Ok(candidates))) => {
                    pending.remove(&kind);
                    let candidates = Self::well_formed(kind, candidates);
                    responses.insert(kind, candidates);
                },
                Ok((kind, Err(e))) => {
                    pending.remove(&kind);
                    tracing::warn!(source = %kind, error = %e, "Source failed");
                    metrics::counter!("advisory_source_errors_total", "source" => kind.as_str(), "reason" => "error")
                        .increment(1);
                    results.skipped.push(kind);
                },
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }

        for kind in pending {
            tracing::debug!(source = %kind, budget_ms = budget.as_millis(), "Source missed deadline");
            metrics::counter!("advisory_source_errors_total", "source" => kind.as_str(), "reason" => "timeout")
                .increment(1);
            results.skipped.push(kind);
        }
        results.skipped.sort();

        results.responses = responses
            .into_iter()
            .map(|(kind, candidates)| SourceResponse { kind, candidates })
            .collect();
        results
    }

    fn well_formed(kind: SourceKind, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let before = candidates.len();
        let kept: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.source == kind && c.validate().is_ok())
            .collect();
        let dropped = before - kept.len();
        if dropped > 0 {
            tracing::debug!(source = %kind, dropped, "Dropped malformed candidates");
            metrics::counter!("advisory_source_malformed_total", "source" => kind.as_str())
                .increment(dropped as u64);
        }
        kept
    }
}
