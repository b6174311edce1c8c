//! Atomic JSON snapshots.
//!
//! Writes go to a uniquely named temp file in the target directory, are
//! fsynced, then renamed over the target. Readers never see a partial file.

use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::Path;

/// Writes `value` as JSON to `path`, replacing any previous file atomically.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the directory cannot be created or
/// the file cannot be written or renamed.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| Error::failed("create_state_dir", e))?;

    let file_name = path
        .file_name()
        .map_or_else(|| "state".into(), |n| n.to_string_lossy());
    let temp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    let json = serde_json::to_vec(value).map_err(|e| Error::failed("serialize_state", e))?;

    let result = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;
        std::fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(Error::failed("write_state", format!("{}: {e}", path.display())));
    }
    Ok(())
}

/// Reads a JSON snapshot.
///
/// Returns `Ok(None)` when the file does not exist.
///
/// # Errors
///
/// Returns [`Error::CacheCorruption`] if the file exists but cannot be read or
/// parsed. Callers treat this as "start empty".
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::CacheCorruption {
                path: path.display().to_string(),
                cause: e.to_string(),
            });
        },
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::CacheCorruption {
            path: path.display().to_string(),
            cause: e.to_string(),
        })
}
