//! Host hooks.
//!
//! Translates host hook payloads into [`ToolEvent`]s, runs them through the
//! [`AdvisoryEngine`], and renders the hook response.
//!
//! # Hook Response JSON Format
//!
//! When the engine stays silent the response is an empty object `{}`.
//! Otherwise the rendered guidance goes into
//! `hookSpecificOutput.additionalContext` and a machine-readable summary of
//! what was emitted goes into `decision`:
//!
//! ```json
//! {
//!   "hookSpecificOutput": {
//!     "hookEventName": "PreToolUse",
//!     "additionalContext": "[ADVISORY] Validate the JWT audience claim"
//!   },
//!   "decision": {
//!     "id": "0192...",
//!     "cache": "miss",
//!     "entries": [
//!       {"tier": "WARNING", "advice_id": "3f9a...", "source": "rules"}
//!     ]
//!   }
//! }
//! ```
//!
//! | Event | `hookEventName` | Handler |
//! |-------|-----------------|---------|
//! | Pre tool use | `PreToolUse` | [`PreToolUseHandler`] |
//! | Post tool use | `PostToolUse` | [`PostToolUseHandler`] |
//! | Post tool use failure | `PostToolUseFailure` | [`PostToolUseFailureHandler`] |
//! | User prompt | `UserPromptSubmit` | [`UserPromptHandler`] |
//!
//! Malformed input never reaches the engine; handlers log it and answer `{}`.

mod input;
mod post_tool_use;
mod post_tool_use_failure;
mod pre_tool_use;
mod response;
mod user_prompt;

pub use input::HookInput;
pub use post_tool_use::PostToolUseHandler;
pub use post_tool_use_failure::PostToolUseFailureHandler;
pub use pre_tool_use::PreToolUseHandler;
pub use response::render_response;
pub use user_prompt::UserPromptHandler;

use crate::Result;
use crate::engine::AdvisoryEngine;
use crate::models::EventKind;

/// Trait for hook handlers.
pub trait HookHandler: Send + Sync {
    /// The hook event type this handler processes.
    fn event_type(&self) -> &'static str;

    /// Handles the hook event.
    ///
    /// # Errors
    ///
    /// Returns an error if the response cannot be serialized.
    fn handle(&self, input: &str) -> Result<String>;
}

/// Returns the handler for an event kind.
#[must_use]
pub fn handler_for(kind: EventKind, engine: AdvisoryEngine) -> Box<dyn HookHandler> {
    match kind {
        EventKind::PreTool => Box::new(PreToolUseHandler::new(engine)),
        EventKind::PostTool => Box::new(PostToolUseHandler::new(engine)),
        EventKind::PostToolFailure => Box::new(PostToolUseFailureHandler::new(engine)),
        EventKind::UserTurnStart => Box::new(UserPromptHandler::new(engine)),
    }
}

/// Shared handling: parse, dispatch, render.
fn dispatch(
    engine: &AdvisoryEngine,
    kind: EventKind,
    hook_name: &'static str,
    input: &str,
) -> Result<String> {
    let event = match HookInput::parse(input).and_then(|parsed| parsed.into_event(kind)) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(hook = hook_name, error = %e, "Ignoring malformed hook input");
            metrics::counter!("advisory_hook_malformed_total", "hook" => hook_name).increment(1);
            return Ok("{}".to_string());
        },
    };
    let response = engine.handle_event(&event);
    render_response(hook_name, &response)
}
