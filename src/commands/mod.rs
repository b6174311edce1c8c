//! Command handlers module.
//!
//! - `hook.rs`: one host hook event from stdin
//! - `serve.rs`: long-running event loop with the background lane
//! - `sweep.rs`: one maintenance pass
//! - `config.rs`: resolved configuration display

mod config;
mod hook;
mod serve;
mod sweep;

use clap::Subcommand;

pub use config::cmd_config;
pub use hook::cmd_hook;
pub use serve::cmd_serve;
pub use sweep::cmd_sweep;

use advisory::models::EventKind;

/// Hook events.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum HookEvent {
    /// Pre tool use hook.
    PreToolUse,
    /// Post tool use hook.
    PostToolUse,
    /// Post tool use failure hook.
    PostToolUseFailure,
    /// User prompt submit hook.
    UserPromptSubmit,
}

impl HookEvent {
    /// Returns the hook event name as a string slice.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreToolUse => "pre-tool-use",
            Self::PostToolUse => "post-tool-use",
            Self::PostToolUseFailure => "post-tool-use-failure",
            Self::UserPromptSubmit => "user-prompt-submit",
        }
    }

    /// The engine event kind for this hook.
    pub const fn kind(self) -> EventKind {
        match self {
            Self::PreToolUse => EventKind::PreTool,
            Self::PostToolUse => EventKind::PostTool,
            Self::PostToolUseFailure => EventKind::PostToolFailure,
            Self::UserPromptSubmit => EventKind::UserTurnStart,
        }
    }
}
