//! Advice context and cache keys.

use super::IdentityHasher;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of recent tool names folded into the volatile key.
const VOLATILE_TOOL_WINDOW: usize = 3;

/// Coarse phase of the session, part of the volatile key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No tool has completed since the last prompt.
    #[default]
    Planning,
    /// Tools are running.
    Executing,
    /// The last tool call failed.
    Recovering,
}

impl SessionPhase {
    /// Returns the phase as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Recovering => "recovering",
        }
    }
}

/// Everything a ranking pass knows about the pending tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdviceContext {
    /// Project/workspace identity (usually the project root path).
    pub project: String,
    /// Host session identifier.
    pub session_id: String,
    /// Tool about to run (or that just ran).
    pub tool_name: String,
    /// Intent classification, e.g. `auth_security`.
    pub intent: String,
    /// Session phase.
    pub phase: SessionPhase,
    /// Most recent tool names, oldest first.
    pub recent_tools: Vec<String>,
    /// Last user prompt, if any.
    pub last_prompt: Option<String>,
    /// Resources touched by the tool call.
    pub resources: Vec<String>,
    /// Free text from the tool input, available to sources for matching.
    pub query_text: String,
}

impl AdviceContext {
    /// Creates a context for a project, session and tool.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            session_id: session_id.into(),
            tool_name: tool_name.into(),
            intent: "general".to_string(),
            phase: SessionPhase::Planning,
            recent_tools: Vec::new(),
            last_prompt: None,
            resources: Vec::new(),
            query_text: String::new(),
        }
    }

    /// Sets the intent classification.
    #[must_use]
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = intent.into();
        self
    }

    /// Sets the session phase.
    #[must_use]
    pub const fn with_phase(mut self, phase: SessionPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Sets the recent tool sequence.
    #[must_use]
    pub fn with_recent_tools(mut self, tools: Vec<String>) -> Self {
        self.recent_tools = tools;
        self
    }

    /// Sets the last prompt.
    #[must_use]
    pub fn with_last_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.last_prompt = Some(prompt.into());
        self
    }

    /// Sets the resources touched by the call.
    #[must_use]
    pub fn with_resources(mut self, resources: Vec<String>) -> Self {
        self.resources = resources;
        self
    }

    /// Sets the free-text query.
    #[must_use]
    pub fn with_query_text(mut self, text: impl Into<String>) -> Self {
        self.query_text = text.into();
        self
    }

    /// Slow-changing half of the cache key.
    #[must_use]
    pub fn stable_key(&self) -> String {
        IdentityHasher::short_hash(&[&self.project])
    }

    /// Fast-changing half of the cache key.
    #[must_use]
    pub fn volatile_key(&self) -> String {
        let start = self.recent_tools.len().saturating_sub(VOLATILE_TOOL_WINDOW);
        let tools = self.recent_tools[start..].join(">");
        let prompt = self.last_prompt.as_deref().unwrap_or("");
        IdentityHasher::short_hash(&[self.phase.as_str(), &tools, prompt])
    }

    /// Full cache key for this context.
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            stable: self.stable_key(),
            volatile: self.volatile_key(),
            tool: self.tool_name.clone(),
            intent: self.intent.clone(),
        }
    }
}

/// Cache key for a packet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Project/workspace component.
    pub stable: String,
    /// Session phase / recent activity component.
    pub volatile: String,
    /// Tool name.
    pub tool: String,
    /// Intent classification.
    pub intent: String,
}

impl CacheKey {
    /// Key string for exact matching.
    #[must_use]
    pub fn exact(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.stable, self.volatile, self.tool, self.intent
        )
    }

    /// Key string for relaxed matching (stable key and tool only).
    #[must_use]
    pub fn relaxed(&self) -> String {
        format!("{}:{}", self.stable, self.tool)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.exact())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AdviceContext {
        AdviceContext::new("/work/proj", "s1", "Edit").with_intent("auth_security")
    }

    #[test]
    fn test_identical_contexts_share_key() {
        assert_eq!(ctx().cache_key(), ctx().cache_key());
    }

    #[test]
    fn test_session_does_not_affect_key() {
        let mut other = ctx();
        other.session_id = "s2".to_string();
        assert_eq!(ctx().cache_key(), other.cache_key());
    }

    #[test]
    fn test_volatile_key_tracks_recent_tools_window() {
        let a = ctx().with_recent_tools(vec!["Read".into(), "Grep".into(), "Edit".into()]);
        let b = ctx().with_recent_tools(vec![
            "Bash".into(),
            "Read".into(),
            "Grep".into(),
            "Edit".into(),
        ]);
        let c = ctx().with_recent_tools(vec!["Read".into(), "Edit".into()]);
        assert_eq!(a.volatile_key(), b.volatile_key());
        assert_ne!(a.volatile_key(), c.volatile_key());
    }

    #[test]
    fn test_relaxed_key_ignores_volatile_and_intent() {
        let a = ctx().cache_key();
        let b = ctx()
            .with_phase(SessionPhase::Recovering)
            .with_intent("testing")
            .cache_key();
        assert_ne!(a.exact(), b.exact());
        assert_eq!(a.relaxed(), b.relaxed());
    }
}
