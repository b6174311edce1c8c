//! Sweep command handler.

use advisory::{AdvisoryEngine, current_timestamp};
use std::io::{self, Write};

/// Sweep command.
///
/// Demotes expired packets, collects dead ones, expires unmatched pending
/// emissions, and persists the result.
pub fn cmd_sweep(engine: &AdvisoryEngine) -> anyhow::Result<()> {
    let before = engine.cache().len();
    let pending_before = engine.feedback().pending_count();

    engine.sweep(current_timestamp());
    engine.flush()?;

    let mut stdout = io::stdout().lock();
    writeln!(
        stdout,
        "packets: {before} -> {}, pending emissions: {pending_before} -> {}",
        engine.cache().len(),
        engine.feedback().pending_count()
    )?;
    Ok(())
}
