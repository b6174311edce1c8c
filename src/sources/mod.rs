//! Candidate source adapters.
//!
//! Sources are external producers of advice candidates. The engine only
//! consumes them through [`CandidateSource`], dispatched by [`SourceKind`]
//! through a [`SourceRegistry`].

mod file;
mod registry;

pub use file::{FileSource, SourceEntry};
pub use registry::{SourceRegistry, SourceResponse, SourceResults};

use crate::Result;
use crate::models::{AdviceContext, Candidate, SourceKind};

/// A producer of advice candidates.
///
/// Implementations must be cheap to call concurrently. The registry enforces
/// the time budget; a slow implementation is abandoned, not interrupted.
pub trait CandidateSource: Send + Sync {
    /// The kind this source reports as.
    fn kind(&self) -> SourceKind;

    /// Returns candidates relevant to `context`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot answer; the registry records the
    /// source as skipped.
    fn query(&self, context: &AdviceContext) -> Result<Vec<Candidate>>;
}

/// A source returning a fixed list of candidates.
#[derive(Debug, Clone)]
pub struct StaticSource {
    kind: SourceKind,
    candidates: Vec<Candidate>,
}

impl StaticSource {
    /// Creates a static source.
    #[must_use]
    pub const fn new(kind: SourceKind, candidates: Vec<Candidate>) -> Self {
        Self { kind, candidates }
    }
}

impl CandidateSource for StaticSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn query(&self, _context: &AdviceContext) -> Result<Vec<Candidate>> {
        Ok(self.candidates.clone())
    }
}
