//! User prompt submit hook handler.

use super::{HookHandler, dispatch};
use crate::Result;
use crate::engine::AdvisoryEngine;
use crate::models::EventKind;

/// Handles `UserPromptSubmit` hook events.
///
/// Records the prompt for later context and queues prefetches.
#[derive(Debug, Clone)]
pub struct UserPromptHandler {
    engine: AdvisoryEngine,
}

impl UserPromptHandler {
    /// Creates a handler over `engine`.
    #[must_use]
    pub const fn new(engine: AdvisoryEngine) -> Self {
        Self { engine }
    }
}

impl HookHandler for UserPromptHandler {
    fn event_type(&self) -> &'static str {
        "UserPromptSubmit"
    }

    #[tracing::instrument(skip_all, fields(hook = "UserPromptSubmit"))]
    fn handle(&self, input: &str) -> Result<String> {
        dispatch(&self.engine, EventKind::UserTurnStart, self.event_type(), input)
    }
}
