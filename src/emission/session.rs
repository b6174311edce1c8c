//! Per-session records.

use crate::gate::GateState;
use crate::models::{EventKind, IdentityHasher, SessionPhase, ToolEvent};
use serde::{Deserialize, Serialize};

/// Number of tool names kept in a trail.
const TRAIL_LEN: usize = 8;

/// Longest prompt kept in a trail, in characters.
const PROMPT_CHARS: usize = 500;

/// What the session has been doing recently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTrail {
    /// Completed tool calls, oldest first.
    #[serde(default)]
    pub recent_tools: Vec<String>,
    /// Last user prompt.
    #[serde(default)]
    pub last_prompt: Option<String>,
    /// Current phase.
    #[serde(default)]
    pub phase: SessionPhase,
    /// Last event time (Unix seconds).
    #[serde(default)]
    pub last_seen: u64,
}

impl SessionTrail {
    /// Folds one event into the trail.
    ///
    /// A user turn resets the phase to planning. Completed tool calls are
    /// appended and move the phase to executing, or recovering on failure.
    /// Pre-tool events only refresh `last_seen`, so a pending call does not
    /// count toward its own context.
    pub fn observe(&mut self, event: &ToolEvent) {
        self.last_seen = self.last_seen.max(event.timestamp);
        match event.kind {
            EventKind::UserTurnStart => {
                if let Some(prompt) = event.prompt.as_deref() {
                    self.last_prompt = Some(prompt.chars().take(PROMPT_CHARS).collect());
                }
                self.phase = SessionPhase::Planning;
            },
            EventKind::PostTool | EventKind::PostToolFailure => {
                if let Some(tool) = event.tool_name.as_deref() {
                    self.recent_tools.push(tool.to_string());
                    let excess = self.recent_tools.len().saturating_sub(TRAIL_LEN);
                    self.recent_tools.drain(..excess);
                }
                self.phase = if event.succeeded() {
                    SessionPhase::Executing
                } else {
                    SessionPhase::Recovering
                };
            },
            EventKind::PreTool => {},
        }
    }
}

/// Everything persisted for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Suppression memory.
    #[serde(default)]
    pub gate: GateState,
    /// Recent activity.
    #[serde(default)]
    pub trail: SessionTrail,
}

/// File name for a session's record.
///
/// Session IDs from the host are usually UUIDs; anything else is hashed so
/// it cannot escape the sessions directory.
pub(super) fn file_name(session_id: &str) -> String {
    let safe = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        format!("{session_id}.json")
    } else {
        format!("h-{}.json", IdentityHasher::short_hash(&[session_id]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trail_tracks_phase_and_tools() {
        let mut trail = SessionTrail::default();
        trail.observe(&ToolEvent::new(EventKind::UserTurnStart, "s", 1).with_prompt("fix login"));
        assert_eq!(trail.phase, SessionPhase::Planning);
        assert_eq!(trail.last_prompt.as_deref(), Some("fix login"));

        trail.observe(&ToolEvent::new(EventKind::PreTool, "s", 2).with_tool("Edit"));
        assert!(trail.recent_tools.is_empty());

        trail.observe(&ToolEvent::new(EventKind::PostTool, "s", 3).with_tool("Edit"));
        assert_eq!(trail.phase, SessionPhase::Executing);

        trail.observe(
            &ToolEvent::new(EventKind::PostTool, "s", 4)
                .with_tool("Bash")
                .with_output(json!({"exit_code": 2})),
        );
        assert_eq!(trail.phase, SessionPhase::Recovering);
        assert_eq!(trail.recent_tools, vec!["Edit".to_string(), "Bash".to_string()]);
        assert_eq!(trail.last_seen, 4);
    }

    #[test]
    fn test_trail_is_bounded() {
        let mut trail = SessionTrail::default();
        for i in 0..20 {
            trail.observe(&ToolEvent::new(EventKind::PostTool, "s", i).with_tool(format!("T{i}")));
        }
        assert_eq!(trail.recent_tools.len(), TRAIL_LEN);
        assert_eq!(trail.recent_tools.last().map(String::as_str), Some("T19"));
    }

    #[test]
    fn test_file_name_is_contained() {
        assert_eq!(file_name("abc-123_x"), "abc-123_x.json");
        let hashed = file_name("../../etc/passwd");
        assert!(hashed.starts_with("h-"));
        assert!(!hashed.contains('/'));
    }
}
