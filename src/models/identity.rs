//! Advice identity hashing.
//!
//! Near-duplicate advice text from different sources must collapse to one
//! identity, so text is normalized before hashing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Normalizing SHA-256 hasher for advice text and key material.
///
/// # Normalization
///
/// - Trimmed of leading/trailing whitespace
/// - Converted to lowercase
/// - Trailing sentence punctuation removed
/// - Multiple whitespace characters collapsed to single spaces
///
/// # Example
///
/// ```rust
/// use advisory::models::IdentityHasher;
///
/// let a = IdentityHasher::hash("Validate JWT audience claims.");
/// let b = IdentityHasher::hash("  validate  jwt audience claims ");
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
pub struct IdentityHasher;

impl IdentityHasher {
    /// Computes the hex SHA-256 of normalized text.
    #[must_use]
    pub fn hash(content: &str) -> String {
        let normalized = Self::normalize(content);
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes a short (16 hex chars) hash of raw, unnormalized parts.
    ///
    /// Used for cache key components where case and punctuation matter.
    #[must_use]
    pub fn short_hash(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        let digest = hex::encode(hasher.finalize());
        digest[..16].to_string()
    }

    /// Normalizes text for identity comparison.
    #[must_use]
    pub fn normalize(content: &str) -> String {
        let collapsed = content
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        collapsed
            .trim_end_matches(['.', '!', ';', ':'])
            .trim()
            .to_string()
    }
}

/// Stable identity of a piece of advice, derived from its normalized text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdviceId(String);

impl AdviceId {
    /// Length of the hash prefix kept in an identity.
    const PREFIX_LEN: usize = 24;

    /// Derives the identity of an advice text.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let hash = IdentityHasher::hash(text);
        Self(hash[..Self::PREFIX_LEN].to_string())
    }

    /// Wraps an existing identity string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
