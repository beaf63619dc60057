//! Atomic JSON persistence for the pipeline's file-backed stores.
//!
//! Every store (ledger, queue, stage tracker) persists through these two
//! functions. Writes go to a sibling temp file followed by a rename, so a
//! crash mid-write can never leave a truncated store behind. Loads that
//! hit a corrupt file reinitialize to empty rather than failing startup —
//! a deliberate data-loss-over-crash policy, surfaced loudly in the log.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, error};

use crate::error::{Error, Result};

/// Load a JSON store, falling back to `T::default()` when the file is
/// missing or unreadable. A parse failure is logged at `error` level —
/// the store's previous contents are abandoned.
pub fn load_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        debug!(path = %path.display(), "state file not found, starting empty");
        return T::default();
    }

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            error!(
                path = %path.display(),
                "failed to read state file, reinitializing empty (data loss): {e}"
            );
            return T::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            error!(
                path = %path.display(),
                "corrupt state file, reinitializing empty (data loss): {e}"
            );
            T::default()
        }
    }
}

/// Serialize `value` and atomically replace the file at `path`.
///
/// The parent directory is created if needed. On failure the caller's
/// in-memory state is untouched, so the next mutation retries the write.
pub fn save_atomic<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::storage(path, e))?;
    }

    let content =
        serde_json::to_string_pretty(value).map_err(|e| Error::storage(path, e))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|e| Error::storage(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::storage(path, e))?;

    debug!(path = %path.display(), "state file written");
    Ok(())
}
