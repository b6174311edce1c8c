//! On-disk persistence primitives.
//!
//! Two shapes of state are persisted:
//!
//! - **Snapshots** (cache index, source statistics, session state) are whole
//!   JSON documents replaced atomically with [`write_json_atomic`].
//! - **Logs** (emissions, outcomes) are append-only JSON Lines written through
//!   [`AppendLog`]; each record is a single `write` call, so a crash can lose
//!   at most the record in flight and readers skip a torn trailing line.

mod append_log;
mod atomic;

pub use append_log::AppendLog;
pub use atomic::{read_json, write_json_atomic};
