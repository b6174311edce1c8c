//! Hook payload parsing.

use crate::models::{EventKind, ToolEvent};
use crate::{Error, Result, current_timestamp};
use serde::Deserialize;
use serde_json::{Value, json};

/// Raw hook payload as sent by the host.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    /// Host event name, e.g. `PreToolUse`.
    #[serde(default)]
    pub hook_event_name: Option<String>,
    /// Host session identifier.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Working directory.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Tool name.
    #[serde(default)]
    pub tool_name: Option<String>,
    /// Tool input.
    #[serde(default)]
    pub tool_input: Value,
    /// Tool response, post-tool events only.
    #[serde(default)]
    pub tool_response: Option<Value>,
    /// Error message, failure events only.
    #[serde(default)]
    pub error: Option<String>,
    /// User prompt.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Event time (Unix seconds); defaults to now.
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl HookInput {
    /// Parses a hook payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the payload is not a JSON object.
    pub fn parse(input: &str) -> Result<Self> {
        serde_json::from_str(input.trim())
            .map_err(|e| Error::InvalidInput(format!("hook payload: {e}")))
    }

    /// Converts the payload into an event of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the session ID is missing, or if
    /// the payload names a different hook event than the handler serves.
    pub fn into_event(self, kind: EventKind) -> Result<ToolEvent> {
        if let Some(name) = self.hook_event_name.as_deref()
            && EventKind::from_hook_name(name).is_some_and(|named| named != kind)
        {
            return Err(Error::InvalidInput(format!(
                "payload for '{name}' sent to the {kind} handler"
            )));
        }
        let session_id = self
            .session_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::InvalidInput("missing session_id".to_string()))?;

        let tool_output = match (kind, self.tool_response, self.error) {
            (EventKind::PostToolFailure, response, error) => {
                let mut output = response.unwrap_or_else(|| json!({}));
                if let Value::Object(map) = &mut output {
                    map.insert("is_error".to_string(), Value::Bool(true));
                    if let Some(error) = error {
                        map.entry("error").or_insert(Value::String(error));
                    }
                }
                Some(output)
            },
            (_, response, _) => response,
        };

        Ok(ToolEvent {
            kind,
            session_id,
            tool_name: self.tool_name.filter(|name| !name.is_empty()),
            tool_input: self.tool_input,
            tool_output,
            prompt: self.prompt,
            cwd: self.cwd,
            timestamp: self.timestamp.unwrap_or_else(current_timestamp),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_pre_tool_payload() {
        let input = r#"{
            "hook_event_name": "PreToolUse",
            "session_id": "abc",
            "cwd": "/repo",
            "tool_name": "Bash",
            "tool_input": {"command": "cargo test"},
            "timestamp": 42
        }"#;
        let event = HookInput::parse(input).unwrap().into_event(EventKind::PreTool).unwrap();
        assert_eq!(event.session_id, "abc");
        assert_eq!(event.tool(), "Bash");
        assert_eq!(event.command(), Some("cargo test"));
        assert_eq!(event.cwd.as_deref(), Some("/repo"));
        assert_eq!(event.timestamp, 42);
    }

    #[test]
    fn test_missing_timestamp_defaults_to_now() {
        let event = HookInput::parse(r#"{"session_id": "abc"}"#)
            .unwrap()
            .into_event(EventKind::UserTurnStart)
            .unwrap();
        assert!(event.timestamp > 0);
    }

    #[test]
    fn test_missing_session_is_rejected() {
        let result = HookInput::parse(r#"{"tool_name": "Edit"}"#)
            .unwrap()
            .into_event(EventKind::PreTool);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_mismatched_event_name_is_rejected() {
        let result = HookInput::parse(r#"{"hook_event_name": "PostToolUse", "session_id": "a"}"#)
            .unwrap()
            .into_event(EventKind::PreTool);
        assert!(result.is_err());
    }

    #[test]
    fn test_failure_payload_marks_error() {
        let event = HookInput::parse(
            r#"{"session_id": "a", "tool_name": "Bash", "error": "exit status 1"}"#,
        )
        .unwrap()
        .into_event(EventKind::PostToolFailure)
        .unwrap();
        let output = event.tool_output.as_ref().unwrap();
        assert_eq!(output["is_error"], true);
        assert_eq!(output["error"], "exit status 1");
        assert!(!event.succeeded());
    }

    #[test]
    fn test_garbage_is_invalid_input() {
        assert!(matches!(HookInput::parse("{"), Err(Error::InvalidInput(_))));
    }
}
