//! Candidate source kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of knowledge sources that can propose advice.
///
/// Declaration order is the registry's query order and is part of the
/// deterministic tiebreak chain, so new kinds go at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Rule-based trigger matcher.
    Rules,
    /// Semantic/keyword memory index.
    Semantic,
    /// Episodic distillation store.
    Episodic,
    /// Domain-plugin learning store.
    DomainPlugin,
    /// Project conventions mined from the workspace.
    Conventions,
    /// Lessons derived from past tool outcomes.
    Outcomes,
    /// Explicit user preferences.
    Preferences,
}

impl SourceKind {
    /// Returns all source kinds in registry order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Rules,
            Self::Semantic,
            Self::Episodic,
            Self::DomainPlugin,
            Self::Conventions,
            Self::Outcomes,
            Self::Preferences,
        ]
    }

    /// Returns the source kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Rules => "rules",
            Self::Semantic => "semantic",
            Self::Episodic => "episodic",
            Self::DomainPlugin => "domain_plugin",
            Self::Conventions => "conventions",
            Self::Outcomes => "outcomes",
            Self::Preferences => "preferences",
        }
    }

    /// Parses a source kind from a string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rules" => Some(Self::Rules),
            "semantic" => Some(Self::Semantic),
            "episodic" => Some(Self::Episodic),
            "domain_plugin" | "domain-plugin" | "plugin" => Some(Self::DomainPlugin),
            "conventions" => Some(Self::Conventions),
            "outcomes" => Some(Self::Outcomes),
            "preferences" => Some(Self::Preferences),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
