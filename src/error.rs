//! Error taxonomy for the ingestion pipeline.
//!
//! Errors fall into two families with different propagation rules:
//!
//! - **Isolated** errors (`Connection`, `Read`, `Chunking`, `Embedding`) are
//!   logged and recorded against the item or connector that produced them;
//!   they never abort a scan or a run.
//! - **Surfaced** errors (`Configuration`, `Storage`, `SourceUnavailable`,
//!   `ItemNotFound`) propagate to the caller. `SourceUnavailable` and
//!   `ItemNotFound` are retryable conditions at the CLI boundary.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A source is unreachable or misconfigured. The connector is disabled
    /// for the current run; other connectors are unaffected.
    #[error("cannot reach source '{connector}': {reason}")]
    Connection { connector: String, reason: String },

    /// Extraction of a single item failed. The item is skipped and the
    /// batch continues.
    #[error("failed to read '{item}': {reason}")]
    Read { item: String, reason: String },

    #[error("chunking failed for '{item}': {reason}")]
    Chunking { item: String, reason: String },

    #[error("embedding failed for '{item}': {reason}")]
    Embedding { item: String, reason: String },

    /// Fatal at startup only.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A persisted store could not be written. The in-memory state is
    /// retained so the next write can retry.
    #[error("storage error for {}: {reason}", .path.display())]
    Storage { path: PathBuf, reason: String },

    /// The connector that owns a queued item is not registered (for
    /// example, credentials were missing at startup). The queue entry is
    /// left untouched.
    #[error("source '{0}' is not registered")]
    SourceUnavailable(String),

    #[error("item '{0}' not found in the processing queue")]
    ItemNotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn read(item: impl Into<String>, reason: impl ToString) -> Self {
        Error::Read {
            item: item.into(),
            reason: reason.to_string(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Storage {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same operation later can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. }
                | Error::SourceUnavailable(_)
                | Error::Storage { .. }
                | Error::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_connection() {
        let err = Error::Connection {
            connector: "drive:docs".to_string(),
            reason: "token expired".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cannot reach source 'drive:docs': token expired"
        );
    }

    #[test]
    fn test_display_source_unavailable() {
        let err = Error::SourceUnavailable("database:warehouse".to_string());
        assert_eq!(
            err.to_string(),
            "source 'database:warehouse' is not registered"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::SourceUnavailable("x".into()).is_retryable());
        assert!(!Error::Configuration("bad".into()).is_retryable());
        assert!(!Error::read("a.txt", "no such file").is_retryable());
    }

    #[test]
    fn test_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
