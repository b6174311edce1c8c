//! Hook command handler.

use advisory::AdvisoryEngine;
use advisory::hooks::handler_for;
use anyhow::Context;
use std::io::{self, Read, Write};
use tracing::info_span;

use super::HookEvent;

/// Hook command.
///
/// Reads one payload from stdin and writes one JSON document to stdout.
/// Engine failures never surface to the host; only I/O on the standard
/// streams can fail this command.
pub fn cmd_hook(event: HookEvent, engine: &AdvisoryEngine) -> anyhow::Result<()> {
    let span = info_span!("advisory.hook.invoke", hook = event.as_str());
    let _span_guard = span.enter();

    let input = read_hook_input()?;
    let handler = handler_for(event.kind(), engine.clone());
    let response = match handler.handle(&input) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "Hook handling failed");
            "{}".to_string()
        },
    };

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{response}").context("writing hook response")?;
    stdout.flush().context("flushing hook response")?;

    if let Err(e) = engine.flush() {
        tracing::warn!(error = %e, "Failed to persist engine state");
    }
    Ok(())
}

/// Reads hook input from stdin as a string.
fn read_hook_input() -> anyhow::Result<String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("reading hook input")?;

    if input.trim().is_empty() {
        Ok("{}".to_string())
    } else {
        Ok(input)
    }
}
