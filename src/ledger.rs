//! Durable processed-item ledgers, one per connector.
//!
//! Two shapes cover the two change-detection families:
//!
//! - [`IdLedger`] — a set of already-processed item ids, for sources whose
//!   identity itself is the change signal (filesystem path-hash + mtime,
//!   cloud-drive file ids). Persisted as `{"processed_files": [...]}`.
//! - [`CursorLedger`] — a high-water mark per table, for ordered sources.
//!   Persisted as `{table_id: {last_processed_key, last_processed_time}}`.
//!
//! Marking is idempotent and every mutation persists synchronously; a
//! crash between mark and the next scan can therefore never replay an
//! item into the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::models::CursorValue;
use crate::store;

// ============ Id-set ledger ============

#[derive(Debug, Default, Serialize, Deserialize)]
struct IdLedgerFile {
    processed_files: BTreeSet<String>,
}

/// Processed-id ledger for hash/id-keyed sources.
#[derive(Debug)]
pub struct IdLedger {
    path: PathBuf,
    ids: BTreeSet<String>,
}

impl IdLedger {
    /// Open the ledger at `path`, loading prior contents if present.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file: IdLedgerFile = store::load_or_default(&path);
        debug!(path = %path.display(), entries = file.processed_files.len(), "ledger opened");
        Self {
            path,
            ids: file.processed_files,
        }
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Mark `id` processed and persist immediately. Marking an
    /// already-present id is a no-op, not an error.
    pub fn mark_processed(&mut self, id: &str) -> Result<()> {
        if !self.ids.insert(id.to_string()) {
            return Ok(());
        }
        self.flush()
    }

    pub fn ids(&self) -> &BTreeSet<String> {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Write the current set to durable storage. Safe to call repeatedly.
    pub fn flush(&self) -> Result<()> {
        store::save_atomic(
            &self.path,
            &IdLedgerFile {
                processed_files: self.ids.clone(),
            },
        )
    }
}

// ============ Cursor ledger ============

/// High-water mark for one table of an ordered source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_key: Option<CursorValue>,
    pub last_processed_time: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct CursorLedgerFile {
    tables: BTreeMap<String, CursorEntry>,
}

/// Per-table cursor ledger for incremental relational extraction.
#[derive(Debug)]
pub struct CursorLedger {
    path: PathBuf,
    tables: BTreeMap<String, CursorEntry>,
}

impl CursorLedger {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file: CursorLedgerFile = store::load_or_default(&path);
        debug!(path = %path.display(), tables = file.tables.len(), "cursor ledger opened");
        Self {
            path,
            tables: file.tables,
        }
    }

    pub fn last_key(&self, table_id: &str) -> Option<&CursorValue> {
        self.tables
            .get(table_id)
            .and_then(|e| e.last_processed_key.as_ref())
    }

    /// Record a processing pass over `table_id`, advancing the stored key
    /// when one is supplied. Always refreshes `last_processed_time` and
    /// persists immediately; repeating a mark is harmless.
    pub fn advance(&mut self, table_id: &str, key: Option<CursorValue>) -> Result<()> {
        let entry = self
            .tables
            .entry(table_id.to_string())
            .or_insert_with(|| CursorEntry {
                last_processed_key: None,
                last_processed_time: Utc::now(),
            });
        if key.is_some() {
            entry.last_processed_key = key;
        }
        entry.last_processed_time = Utc::now();
        self.flush()
    }

    pub fn table_ids(&self) -> BTreeSet<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn flush(&self) -> Result<()> {
        store::save_atomic(
            &self.path,
            &CursorLedgerFile {
                tables: self.tables.clone(),
            },
        )
    }
}

/// Ledger file path for a connector, keyed by its source label.
/// Labels contain `:`; the file name swaps it for `-` to stay portable.
pub fn ledger_path(state_dir: &Path, source_label: &str) -> PathBuf {
    state_dir
        .join("ledgers")
        .join(format!("{}.json", source_label.replace(':', "-")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mark_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.json");
        let mut ledger = IdLedger::open(&path);

        ledger.mark_processed("item-1").unwrap();
        ledger.mark_processed("item-1").unwrap();

        assert_eq!(ledger.len(), 1);
        assert!(ledger.is_processed("item-1"));
    }

    #[test]
    fn test_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.json");

        {
            let mut ledger = IdLedger::open(&path);
            ledger.mark_processed("a").unwrap();
            ledger.mark_processed("b").unwrap();
        }

        let reopened = IdLedger::open(&path);
        assert!(reopened.is_processed("a"));
        assert!(reopened.is_processed("b"));
        assert!(!reopened.is_processed("c"));
    }

    #[test]
    fn test_persisted_shape() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.json");
        let mut ledger = IdLedger::open(&path);
        ledger.mark_processed("x").unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["processed_files"], serde_json::json!(["x"]));
    }

    #[test]
    fn test_corrupt_ledger_reinitializes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ledger.json");
        std::fs::write(&path, "garbage").unwrap();

        let ledger = IdLedger::open(&path);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_cursor_advance_and_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cursors.json");

        {
            let mut ledger = CursorLedger::open(&path);
            ledger
                .advance("orders", Some(CursorValue::Int(1000)))
                .unwrap();
            // A pass with no new rows refreshes the timestamp only.
            ledger.advance("orders", None).unwrap();
        }

        let reopened = CursorLedger::open(&path);
        assert_eq!(reopened.last_key("orders"), Some(&CursorValue::Int(1000)));
        assert_eq!(reopened.last_key("customers"), None);
    }

    #[test]
    fn test_cursor_persisted_shape() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cursors.json");
        let mut ledger = CursorLedger::open(&path);
        ledger
            .advance("orders", Some(CursorValue::Int(42)))
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["orders"]["last_processed_key"], serde_json::json!(42));
        assert!(raw["orders"]["last_processed_time"].is_string());
    }

    #[test]
    fn test_ledger_path_is_portable() {
        let path = ledger_path(Path::new("/state"), "filesystem:docs");
        assert_eq!(
            path,
            PathBuf::from("/state/ledgers/filesystem-docs.json")
        );
    }
}
