//! Post tool use hook handler.

use super::{HookHandler, dispatch};
use crate::Result;
use crate::engine::AdvisoryEngine;
use crate::models::EventKind;

/// Handles `PostToolUse` hook events.
///
/// Invalidates packets for modified files and feeds the outcome to the
/// effectiveness loop. Always answers `{}`.
#[derive(Debug, Clone)]
pub struct PostToolUseHandler {
    engine: AdvisoryEngine,
}

impl PostToolUseHandler {
    /// Creates a handler over `engine`.
    #[must_use]
    pub const fn new(engine: AdvisoryEngine) -> Self {
        Self { engine }
    }
}

impl HookHandler for PostToolUseHandler {
    fn event_type(&self) -> &'static str {
        "PostToolUse"
    }

    #[tracing::instrument(skip_all, fields(hook = "PostToolUse"))]
    fn handle(&self, input: &str) -> Result<String> {
        dispatch(&self.engine, EventKind::PostTool, self.event_type(), input)
    }
}
