//! Serve command handler.
//!
//! Reads newline-delimited hook payloads from stdin and answers each with one
//! line on stdout. Every payload must carry `hook_event_name`. The background
//! lane runs on a tokio runtime beside the event loop.

use advisory::AdvisoryEngine;
use advisory::hooks::{HookInput, render_response};
use advisory::models::EventKind;
use advisory::workers::BackgroundLane;
use anyhow::Context;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// How often the event loop checks for Ctrl-C while idle.
const STOP_POLL: Duration = Duration::from_millis(200);

/// Serve command.
pub fn cmd_serve(engine: &AdvisoryEngine) -> anyhow::Result<()> {
    let config = engine.config();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("advisory-lane")
        .build()
        .context("starting background runtime")?;

    let lane = {
        let _guard = runtime.enter();
        BackgroundLane::spawn(Arc::new(engine.clone()), &config.workers)
    };
    engine.attach_lane(lane.handle())?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("installing Ctrl-C handler")?;
    }

    let backlog = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel::<String>();
    {
        let backlog = Arc::clone(&backlog);
        thread::Builder::new()
            .name("advisory-stdin".to_string())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    backlog.fetch_add(1, Ordering::SeqCst);
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
            .context("starting stdin reader")?;
    }

    tracing::info!("Serving events from stdin");
    let mut handled = 0_u64;
    while !stop.load(Ordering::SeqCst) {
        let line = match rx.recv_timeout(STOP_POLL) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let waiting = backlog.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        engine.note_backlog(waiting);

        let response = handle_line(engine, &line);
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{response}").context("writing response")?;
        stdout.flush().context("flushing response")?;
        handled += 1;
    }

    tracing::info!(handled, "Stopping");
    runtime.block_on(lane.shutdown());
    engine.flush()?;
    Ok(())
}

fn handle_line(engine: &AdvisoryEngine, line: &str) -> String {
    let parsed = HookInput::parse(line).and_then(|input| {
        let name = input.hook_event_name.clone().unwrap_or_default();
        let kind = EventKind::from_hook_name(&name).ok_or_else(|| {
            advisory::Error::InvalidInput(format!("unknown hook event '{name}'"))
        })?;
        Ok((name, input.into_event(kind)?))
    });
    let (name, event) = match parsed {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed event");
            return "{}".to_string();
        },
    };
    let response = engine.handle_event(&event);
    render_response(&name, &response).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to render response");
        "{}".to_string()
    })
}
