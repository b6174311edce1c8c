//! Cached decision packets.

use super::{AuthorityTier, CacheKey, ScoredCandidate, SourceKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle status of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacketStatus {
    /// Just computed, not yet published.
    Created,
    /// Available for lookup.
    Ready,
    /// Freshness deadline passed or reuse too low.
    Stale,
    /// Explicitly revoked by an event.
    Invalidated,
}

impl PacketStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Ready => "READY",
            Self::Stale => "STALE",
            Self::Invalidated => "INVALIDATED",
        }
    }
}

/// How closely a cache hit matched the requesting context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    /// Computed for this exact context (or a live ranking).
    #[default]
    Exact,
    /// Borrowed from a packet with the same project and tool.
    Relaxed,
}

/// Contribution of one source to a ranking pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContribution {
    /// Source kind.
    pub source: SourceKind,
    /// Candidates the source returned.
    pub returned: usize,
    /// Candidates from this source that made the top-K.
    pub ranked: usize,
    /// Best composite score among its ranked candidates.
    pub best_score: f32,
}

/// Provenance of a packet's ranked list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Lineage {
    /// Sources that returned candidates.
    pub contributions: Vec<SourceContribution>,
    /// Sources that failed, timed out, or returned malformed data.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SourceKind>,
    /// Match confidence of the lookup that produced this packet.
    #[serde(default)]
    pub confidence: MatchConfidence,
}

impl Lineage {
    /// Sources that contributed at least one ranked candidate.
    #[must_use]
    pub fn contributing_sources(&self) -> Vec<SourceKind> {
        self.contributions
            .iter()
            .filter(|c| c.ranked > 0)
            .map(|c| c.source)
            .collect()
    }
}

/// A gate survivor tagged with its authority tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survivor {
    /// The ranked candidate.
    pub scored: ScoredCandidate,
    /// Authority tier.
    pub tier: AuthorityTier,
    /// Whether this survivor was admitted through the rate-limited fallback.
    #[serde(default)]
    pub fallback: bool,
}

/// A cached, previously computed ranked/gated decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Cache key.
    pub key: CacheKey,
    /// Ranked candidates (top-K, descending).
    pub ranked: Vec<ScoredCandidate>,
    /// Ranked candidates tagged with authority, `SILENT` removed.
    pub survivors: Vec<Survivor>,
    /// Provenance of the ranking.
    pub lineage: Lineage,
    /// Union of candidate resource references.
    pub resources: BTreeSet<String>,
    /// Creation time (Unix seconds).
    pub created_at: u64,
    /// Last status change (Unix seconds).
    pub updated_at: u64,
    /// Freshness deadline (Unix seconds).
    pub fresh_until: u64,
    /// Lifecycle status.
    pub status: PacketStatus,
    /// Why the packet was invalidated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidation_reason: Option<String>,
}

impl Packet {
    /// Whether the packet can serve lookups at `now`.
    #[must_use]
    pub const fn is_servable(&self, now: u64) -> bool {
        matches!(self.status, PacketStatus::Ready) && now <= self.fresh_until
    }

    /// Whether any candidate references a resource matching `path`.
    ///
    /// Matches exact paths and paths sharing a suffix on a component
    /// boundary, so `src/auth.rs` matches `/repo/src/auth.rs`.
    #[must_use]
    pub fn references(&self, path: &str) -> bool {
        self.resources
            .iter()
            .any(|resource| resource_matches(resource, path))
    }

    /// Returns a copy transitioned to `status` at `now`.
    #[must_use]
    pub fn transitioned(&self, status: PacketStatus, now: u64, reason: Option<String>) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.updated_at = now;
        if reason.is_some() {
            next.invalidation_reason = reason;
        }
        next
    }
}

/// Compares two resource references on path component boundaries.
#[must_use]
pub fn resource_matches(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (longer, shorter) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    if shorter.is_empty() {
        return false;
    }
    longer.ends_with(shorter)
        && longer[..longer.len() - shorter.len()].ends_with(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_matches() {
        assert!(resource_matches("src/auth.rs", "src/auth.rs"));
        assert!(resource_matches("/repo/src/auth.rs", "src/auth.rs"));
        assert!(resource_matches("auth.rs", "/repo/src/auth.rs"));
        assert!(!resource_matches("/repo/src/oauth.rs", "auth.rs"));
        assert!(!resource_matches("", "auth.rs"));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(PacketStatus::Invalidated.as_str(), "INVALIDATED");
        let json = serde_json::to_string(&PacketStatus::Ready).unwrap();
        assert_eq!(json, "\"READY\"");
    }
}
