//! Inbound host-session events.

use super::IdentityHasher;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Kind of host-session event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A tool is about to run.
    PreTool,
    /// A tool completed successfully.
    PostTool,
    /// A tool completed with a failure.
    PostToolFailure,
    /// The user submitted a prompt.
    UserTurnStart,
}

impl EventKind {
    /// Returns the event kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PreTool => "pre_tool",
            Self::PostTool => "post_tool",
            Self::PostToolFailure => "post_tool_failure",
            Self::UserTurnStart => "user_turn_start",
        }
    }

    /// Maps a host hook event name to an event kind.
    #[must_use]
    pub fn from_hook_name(name: &str) -> Option<Self> {
        match name {
            "PreToolUse" | "pre-tool-use" | "pre_tool" => Some(Self::PreTool),
            "PostToolUse" | "post-tool-use" | "post_tool" => Some(Self::PostTool),
            "PostToolUseFailure" | "post-tool-use-failure" | "post_tool_failure" => {
                Some(Self::PostToolFailure)
            },
            "UserPromptSubmit" | "user-prompt-submit" | "user_turn_start" => {
                Some(Self::UserTurnStart)
            },
            _ => None,
        }
    }

    /// Whether the event carries a tool outcome.
    #[must_use]
    pub const fn is_outcome(&self) -> bool {
        matches!(self, Self::PostTool | Self::PostToolFailure)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured event from the host session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Host session identifier.
    pub session_id: String,
    /// Tool name (absent for user turns).
    #[serde(default)]
    pub tool_name: Option<String>,
    /// Tool input payload.
    #[serde(default)]
    pub tool_input: Value,
    /// Tool output payload (post-tool events only).
    #[serde(default)]
    pub tool_output: Option<Value>,
    /// User prompt (user-turn events only).
    #[serde(default)]
    pub prompt: Option<String>,
    /// Working directory of the host session.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Event time (Unix seconds).
    pub timestamp: u64,
}

/// Tools whose successful execution modifies the files named in their input.
const FILE_MODIFYING_TOOLS: &[&str] = &["Edit", "Write", "MultiEdit", "NotebookEdit"];

/// Input keys that carry file paths.
const PATH_KEYS: &[&str] = &["file_path", "path", "notebook_path"];

/// A shell token that looks like a file path with an extension.
static COMMAND_PATH: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(?:\.{0,2}/)?(?:[\w.-]+/)*[\w-]+\.[A-Za-z0-9]{1,8}$").ok());

/// Shell verbs that write to the paths they name.
static MUTATING_COMMAND: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?:^|[\s;&|])(?:rm|mv|cp|sed\s+-i|tee|touch|truncate|git\s+checkout|>{1,2})(?:\s|$)")
        .ok()
});

/// Whether a tool modifies the files it references.
#[must_use]
pub fn is_file_modifying_tool(tool_name: &str) -> bool {
    FILE_MODIFYING_TOOLS.contains(&tool_name)
}

impl ToolEvent {
    /// Creates an event with an empty payload.
    #[must_use]
    pub fn new(kind: EventKind, session_id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            tool_name: None,
            tool_input: Value::Null,
            tool_output: None,
            prompt: None,
            cwd: None,
            timestamp,
        }
    }

    /// Sets the tool name.
    #[must_use]
    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    /// Sets the tool input.
    #[must_use]
    pub fn with_input(mut self, input: Value) -> Self {
        self.tool_input = input;
        self
    }

    /// Sets the tool output.
    #[must_use]
    pub fn with_output(mut self, output: Value) -> Self {
        self.tool_output = Some(output);
        self
    }

    /// Sets the prompt.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Tool name or empty string.
    #[must_use]
    pub fn tool(&self) -> &str {
        self.tool_name.as_deref().unwrap_or("")
    }

    /// Resource references named in the tool input.
    ///
    /// Reads well-known path keys, and path-looking tokens from shell
    /// commands. Sorted and deduplicated.
    #[must_use]
    pub fn resource_refs(&self) -> Vec<String> {
        let mut refs = BTreeSet::new();
        for key in PATH_KEYS {
            if let Some(path) = self.tool_input.get(*key).and_then(Value::as_str)
                && !path.is_empty()
            {
                refs.insert(path.to_string());
            }
        }
        if let Some(edits) = self.tool_input.get("edits").and_then(Value::as_array) {
            for edit in edits {
                if let Some(path) = edit.get("file_path").and_then(Value::as_str) {
                    refs.insert(path.to_string());
                }
            }
        }
        if let Some(command) = self.command() {
            refs.extend(command_paths(command));
        }
        refs.into_iter().collect()
    }

    /// Resources this event modified, if it is a successful mutating call.
    #[must_use]
    pub fn modified_resources(&self) -> Vec<String> {
        if self.kind != EventKind::PostTool {
            return Vec::new();
        }
        let tool = self.tool();
        if is_file_modifying_tool(tool) {
            return self.resource_refs();
        }
        if tool == "Bash"
            && let Some(command) = self.command()
            && MUTATING_COMMAND
                .as_ref()
                .is_some_and(|re| re.is_match(command))
        {
            return command_paths(command);
        }
        Vec::new()
    }

    /// Short hash of the tool name and its full input.
    ///
    /// Two calls with the same fingerprint are the same call issued again.
    #[must_use]
    pub fn input_fingerprint(&self) -> String {
        IdentityHasher::short_hash(&[self.tool(), &self.tool_input.to_string()])
    }

    /// Shell command, for `Bash` calls.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.tool_input.get("command").and_then(Value::as_str)
    }

    /// Text from the tool input useful for matching and intent detection.
    #[must_use]
    pub fn query_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for key in [
            "command",
            "description",
            "pattern",
            "query",
            "old_string",
            "new_string",
            "content",
            "prompt",
        ] {
            if let Some(text) = self.tool_input.get(key).and_then(Value::as_str) {
                parts.push(text);
            }
        }
        if let Some(prompt) = self.prompt.as_deref() {
            parts.push(prompt);
        }
        let joined = parts.join(" ");
        truncate_chars(&joined, 2_000)
    }

    /// Whether the user interrupted or rejected the call.
    #[must_use]
    pub fn user_corrected(&self) -> bool {
        self.tool_output.as_ref().is_some_and(|output| {
            output.get("interrupted").and_then(Value::as_bool).unwrap_or(false)
                || output.get("user_rejected").and_then(Value::as_bool).unwrap_or(false)
        })
    }

    /// Whether the host reported the tool call as failed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        match self.kind {
            EventKind::PostToolFailure => false,
            EventKind::PostTool => !self.tool_output.as_ref().is_some_and(output_reports_error),
            EventKind::PreTool | EventKind::UserTurnStart => true,
        }
    }
}

fn output_reports_error(output: &Value) -> bool {
    output.get("is_error").and_then(Value::as_bool).unwrap_or(false)
        || output.get("success").and_then(Value::as_bool) == Some(false)
        || output
            .get("exit_code")
            .and_then(Value::as_i64)
            .is_some_and(|code| code != 0)
}

fn command_paths(command: &str) -> Vec<String> {
    let Some(re) = COMMAND_PATH.as_ref() else {
        return Vec::new();
    };
    let mut paths: Vec<String> = command
        .split(|c: char| c.is_whitespace() || matches!(c, '|' | ';' | '&'))
        .map(|token| token.trim_matches(|c: char| matches!(c, '"' | '\'' | '>' | '<' | '(' | ')')))
        .filter(|token| re.is_match(token))
        .map(str::to_string)
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_hook_name() {
        assert_eq!(EventKind::from_hook_name("PreToolUse"), Some(EventKind::PreTool));
        assert_eq!(
            EventKind::from_hook_name("PostToolUseFailure"),
            Some(EventKind::PostToolFailure)
        );
        assert_eq!(
            EventKind::from_hook_name("UserPromptSubmit"),
            Some(EventKind::UserTurnStart)
        );
        assert_eq!(EventKind::from_hook_name("Stop"), None);
    }

    #[test]
    fn test_resource_refs_from_edit() {
        let event = ToolEvent::new(EventKind::PreTool, "s", 1)
            .with_tool("Edit")
            .with_input(json!({"file_path": "src/auth.rs", "old_string": "a", "new_string": "b"}));
        assert_eq!(event.resource_refs(), vec!["src/auth.rs".to_string()]);
    }

    #[test]
    fn test_resource_refs_from_multi_edit() {
        let event = ToolEvent::new(EventKind::PreTool, "s", 1)
            .with_tool("MultiEdit")
            .with_input(json!({
                "file_path": "a.rs",
                "edits": [{"file_path": "b.rs"}, {"file_path": "a.rs"}]
            }));
        assert_eq!(event.resource_refs(), vec!["a.rs".to_string(), "b.rs".to_string()]);
    }

    #[test]
    fn test_resource_refs_from_command() {
        let event = ToolEvent::new(EventKind::PreTool, "s", 1)
            .with_tool("Bash")
            .with_input(json!({"command": "cargo test && cat src/lib.rs | head"}));
        assert_eq!(event.resource_refs(), vec!["src/lib.rs".to_string()]);
    }

    #[test]
    fn test_modified_resources_only_for_successful_mutations() {
        let edit = ToolEvent::new(EventKind::PostTool, "s", 1)
            .with_tool("Write")
            .with_input(json!({"file_path": "README.md"}));
        assert_eq!(edit.modified_resources(), vec!["README.md".to_string()]);

        let read = ToolEvent::new(EventKind::PostTool, "s", 1)
            .with_tool("Read")
            .with_input(json!({"file_path": "README.md"}));
        assert!(read.modified_resources().is_empty());

        let failed = ToolEvent::new(EventKind::PostToolFailure, "s", 1)
            .with_tool("Write")
            .with_input(json!({"file_path": "README.md"}));
        assert!(failed.modified_resources().is_empty());

        let rm = ToolEvent::new(EventKind::PostTool, "s", 1)
            .with_tool("Bash")
            .with_input(json!({"command": "rm build/out.log"}));
        assert_eq!(rm.modified_resources(), vec!["build/out.log".to_string()]);
    }

    #[test]
    fn test_succeeded() {
        let ok = ToolEvent::new(EventKind::PostTool, "s", 1).with_output(json!({"stdout": "ok"}));
        assert!(ok.succeeded());

        let err = ToolEvent::new(EventKind::PostTool, "s", 1).with_output(json!({"is_error": true}));
        assert!(!err.succeeded());

        let exit = ToolEvent::new(EventKind::PostTool, "s", 1).with_output(json!({"exit_code": 1}));
        assert!(!exit.succeeded());

        let failure = ToolEvent::new(EventKind::PostToolFailure, "s", 1);
        assert!(!failure.succeeded());
    }

    #[test]
    fn test_user_corrected() {
        let interrupted =
            ToolEvent::new(EventKind::PostTool, "s", 1).with_output(json!({"interrupted": true}));
        assert!(interrupted.user_corrected());
        assert!(!ToolEvent::new(EventKind::PostTool, "s", 1).user_corrected());
    }

    #[test]
    fn test_input_fingerprint_distinguishes_calls() {
        let edit = |new: &str| {
            ToolEvent::new(EventKind::PostTool, "s", 1)
                .with_tool("Edit")
                .with_input(json!({"file_path": "src/auth.rs", "new_string": new}))
        };
        assert_eq!(edit("a").input_fingerprint(), edit("a").input_fingerprint());
        assert_ne!(edit("a").input_fingerprint(), edit("b").input_fingerprint());
        assert_eq!(edit("a").input_fingerprint().len(), 16);
    }

    #[test]
    fn test_query_text_truncates() {
        let long = "x".repeat(5_000);
        let event = ToolEvent::new(EventKind::PreTool, "s", 1).with_input(json!({"content": long}));
        assert_eq!(event.query_text().chars().count(), 2_000);
    }
}
