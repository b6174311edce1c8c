//! Append-only JSON Lines log.

use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// An append-only JSON Lines file.
///
/// Each record is serialized into one buffer ending in `\n` and written with a
/// single call on a file opened in append mode. Concurrent appends from this
/// process are additionally serialized by an internal mutex.
#[derive(Debug)]
pub struct AppendLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AppendLog {
    /// Creates a log at `path`. The file is created on first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the log path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if serialization or the write fails.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let mut line = serde_json::to_vec(record).map_err(|e| Error::failed("serialize_record", e))?;
        line.push(b'\n');

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::failed("create_log_dir", e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::failed("open_log", e))?;
        file.write_all(&line)
            .map_err(|e| Error::failed("append_log", e))
    }

    /// Reads every well-formed record. Malformed lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the file exists but cannot be read.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::failed("open_log", e)),
        };

        let mut records = Vec::new();
        let mut skipped = 0_usize;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| Error::failed("read_log", e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(path = %self.path.display(), skipped, "Skipped malformed log lines");
        }
        Ok(records)
    }
}
