//! # Advisory
//!
//! A decision-time advisory engine for AI coding assistant sessions.
//!
//! Before and after each tool invocation the engine decides whether to surface
//! a short piece of guidance drawn from previously accumulated knowledge. It
//! never blocks the host session: the worst case is emitting nothing.
//!
//! ## Pipeline
//!
//! ```text
//! event ─► PacketCache::lookup ──hit──────────────┐
//!                 │ miss                          ▼
//!                 └──► FusionRanker ─► store ─► SuppressionGate ─► SynthesisRouter ─► EmissionTracker
//!                                                                                         │
//! post-tool outcome ─────────────────────────────► EffectivenessTracker ◄────────────────┘
//! ```
//!
//! Background work (prefetch, cache sweeps, statistics flushes) runs on the
//! [`workers`] lane and yields to the hot path under load.
//!
//! ## Example
//!
//! ```rust,ignore
//! use advisory::config::EnvVars;
//! use advisory::{AdvisoryEngine, ConfigPaths, ConfigResolver, SourceRegistry};
//!
//! let resolver = ConfigResolver::bootstrap(ConfigPaths::discover(), EnvVars::from_process())?;
//! let engine = AdvisoryEngine::open(resolver, SourceRegistry::new());
//! let response = engine.handle_event(&event);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod cache;
pub mod config;
pub mod emission;
pub mod engine;
pub mod feedback;
pub mod gate;
pub mod hooks;
pub mod models;
pub mod observability;
pub mod ranking;
pub mod sources;
pub mod storage;
pub mod synthesis;
pub mod workers;

pub use cache::{CacheHit, PacketCache};
pub use config::{AdvisoryConfig, ConfigPaths, ConfigResolver};
pub use emission::EmissionTracker;
pub use engine::{AdvisoryEngine, EngineBuilder, EngineResponse};
pub use feedback::EffectivenessTracker;
pub use gate::{GateOutcome, SuppressionGate};
pub use hooks::HookHandler;
pub use models::{
    AdviceContext, AuthorityTier, Candidate, EventKind, Outcome, Packet, PacketStatus, SourceKind,
    ToolEvent,
};
pub use ranking::FusionRanker;
pub use sources::{CandidateSource, SourceRegistry};
pub use synthesis::{Refiner, SynthesisRouter};
pub use workers::{BackgroundLane, LaneHandle};

/// Error type for advisory operations.
///
/// Every variant except [`Error::ConfigResolution`] raised against the
/// baseline layer at startup is recovered inside the engine; the host session
/// only ever observes empty output.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed event payloads, unknown source kinds |
/// | `OperationFailed` | I/O errors, serialization failures |
/// | `SourceUnavailable` | A candidate source failed, timed out, or returned junk |
/// | `CacheCorruption` | The persisted cache index cannot be parsed |
/// | `GenerationTimeout` | Refinement exceeded its deadline |
/// | `GenerationFailure` | Refinement provider returned an error |
/// | `ConfigResolution` | A configuration layer is malformed |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A candidate source failed or exceeded its time budget.
    #[error("source '{source_kind}' unavailable: {cause}")]
    SourceUnavailable {
        /// The source kind that failed.
        source_kind: String,
        /// The underlying cause.
        cause: String,
    },

    /// The persisted cache index is unreadable or malformed.
    #[error("cache index corrupted at {path}: {cause}")]
    CacheCorruption {
        /// Path of the index file.
        path: String,
        /// Parse or read error.
        cause: String,
    },

    /// Generative refinement missed its deadline.
    #[error("generation timed out after {elapsed_ms}ms")]
    GenerationTimeout {
        /// Time spent waiting before giving up.
        elapsed_ms: u64,
    },

    /// Generative refinement failed.
    #[error("generation failed: {0}")]
    GenerationFailure(String),

    /// A configuration layer could not be resolved.
    #[error("config layer '{layer}' could not be resolved: {cause}")]
    ConfigResolution {
        /// Layer name (`baseline`, `overrides`, `env`).
        layer: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Shorthand for [`Error::OperationFailed`].
    pub fn failed(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for advisory operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
///
/// # Examples
///
/// ```rust
/// use advisory::current_timestamp;
///
/// assert!(current_timestamp() > 0);
/// ```
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
