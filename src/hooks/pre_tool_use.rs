//! Pre tool use hook handler.

use super::{HookHandler, dispatch};
use crate::Result;
use crate::engine::AdvisoryEngine;
use crate::models::EventKind;

/// Handles `PreToolUse` hook events.
///
/// Surfaces advice for the call about to run.
#[derive(Debug, Clone)]
pub struct PreToolUseHandler {
    engine: AdvisoryEngine,
}

impl PreToolUseHandler {
    /// Creates a handler over `engine`.
    #[must_use]
    pub const fn new(engine: AdvisoryEngine) -> Self {
        Self { engine }
    }
}

impl HookHandler for PreToolUseHandler {
    fn event_type(&self) -> &'static str {
        "PreToolUse"
    }

    #[tracing::instrument(skip_all, fields(hook = "PreToolUse"))]
    fn handle(&self, input: &str) -> Result<String> {
        dispatch(&self.engine, EventKind::PreTool, self.event_type(), input)
    }
}
