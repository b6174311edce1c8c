//! Data models for the advisory engine.
//!
//! This module contains the core data structures shared by the ranking,
//! caching, gating and feedback components.

mod authority;
mod candidate;
mod context;
mod decision;
mod effectiveness;
mod event;
mod identity;
mod packet;
mod source;

pub use authority::{AuthorityTier, TierThresholds};
pub use candidate::{Candidate, ScoredCandidate};
pub use context::{AdviceContext, CacheKey, SessionPhase};
pub use decision::{CacheDisposition, DecisionEntry, DecisionRecord};
pub use effectiveness::{EffectivenessRecord, Outcome};
pub use event::{EventKind, ToolEvent, is_file_modifying_tool};
pub use identity::{AdviceId, IdentityHasher};
pub use packet::{
    Lineage, MatchConfidence, Packet, PacketStatus, SourceContribution, Survivor,
    resource_matches,
};
pub use source::SourceKind;
