//! Post tool use failure hook handler.

use super::{HookHandler, dispatch};
use crate::Result;
use crate::engine::AdvisoryEngine;
use crate::models::EventKind;

/// Handles `PostToolUseFailure` hook events.
///
/// Records the failed outcome, then advises on the failed call.
#[derive(Debug, Clone)]
pub struct PostToolUseFailureHandler {
    engine: AdvisoryEngine,
}

impl PostToolUseFailureHandler {
    /// Creates a handler over `engine`.
    #[must_use]
    pub const fn new(engine: AdvisoryEngine) -> Self {
        Self { engine }
    }
}

impl HookHandler for PostToolUseFailureHandler {
    fn event_type(&self) -> &'static str {
        "PostToolUseFailure"
    }

    #[tracing::instrument(skip_all, fields(hook = "PostToolUseFailure"))]
    fn handle(&self, input: &str) -> Result<String> {
        dispatch(&self.engine, EventKind::PostToolFailure, self.event_type(), input)
    }
}
