//! Connector capability traits and the connector registry.
//!
//! Every data source sits behind the same [`Connector`] interface:
//! `connect` probes health, `scan` enumerates unprocessed items, and
//! `mark_processed` acknowledges a completed hand-off back into the
//! connector's own ledger. The orchestrator only ever talks to these
//! methods — it never branches on a source name except for logging.
//!
//! Optional capabilities are separate traits rather than probed methods:
//! a connector that can copy raw item bytes to a local destination
//! exposes [`Fetch`]; a connector that serves row batches from ordered
//! tables exposes [`Tabular`].
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           ConnectorRegistry              │
//! │  ┌────────────┐ ┌───────┐ ┌───────────┐  │
//! │  │ filesystem │ │ drive │ │ database  │  │
//! │  └────────────┘ └───────┘ └───────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!    scan_and_queue() → processing queue
//! ```

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::Result;
use crate::models::{CursorValue, ItemMetadata};

/// A data source that produces items for the ingestion pipeline.
///
/// # Contract
///
/// - `scan` applies the connector's own change-signal filter before
///   returning: an item whose id (or cursor) is already covered by the
///   connector's ledger never appears in the result.
/// - `mark_processed` is idempotent and persists immediately.
/// - A failing scan affects only this connector; the orchestrator
///   records the error and carries on with the others.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Instance name from the configuration (e.g. `"docs"`).
    fn name(&self) -> &str;

    /// One-line description for the `sources` listing.
    fn description(&self) -> &str;

    /// Type identifier: `"filesystem"`, `"drive"`, or `"database"`.
    fn connector_type(&self) -> &str;

    /// Label used to tag items from this connector: `"{type}:{name}"`.
    /// Items carry this in `ItemMetadata::source`, and the orchestrator
    /// resolves acknowledgements back through it.
    fn source_label(&self) -> String {
        format!("{}:{}", self.connector_type(), self.name())
    }

    /// Verify reachability and credentials.
    ///
    /// Expected absence (missing directory, missing token) reports
    /// `Ok(false)` after attempting recovery where possible; only
    /// unrecoverable configuration errors return `Err`.
    async fn connect(&self) -> Result<bool>;

    /// Enumerate items not yet covered by this connector's ledger.
    async fn scan(&self) -> Result<Vec<ItemMetadata>>;

    /// Read-only view of the ledger, for diagnostics and orchestrator
    /// cross-checks.
    fn processed_items(&self) -> BTreeSet<String>;

    /// Acknowledge `item_id` as processed. Cursor-based sources advance
    /// their high-water mark to `cursor` when one is given.
    fn mark_processed(&self, item_id: &str, cursor: Option<CursorValue>) -> Result<()>;

    /// Flush in-memory ledger state to durable storage. Safe to call
    /// repeatedly.
    fn close(&self) -> Result<()>;

    /// Downcast to the byte-fetch capability, if this source supports it.
    fn fetch(&self) -> Option<&dyn Fetch> {
        None
    }

    /// Downcast to the row-batch capability, if this source supports it.
    fn tabular(&self) -> Option<&dyn Tabular> {
        None
    }
}

/// Capability: copy an item's raw bytes to a local destination.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Download `item` into `dest_dir` and return the written path.
    async fn fetch(&self, item: &ItemMetadata, dest_dir: &Path) -> Result<PathBuf>;
}

/// One batch of rows pulled from an ordered table.
pub struct RowBatch {
    /// Rows as JSON objects, in incremental-column order.
    pub rows: Vec<Map<String, Value>>,
    /// Maximum incremental-column value observed in this batch.
    pub latest_key: Option<CursorValue>,
}

/// Capability: incremental row extraction from relational tables.
#[async_trait]
pub trait Tabular: Send + Sync {
    /// Fetch the next batch of rows past the stored cursor for `table_id`.
    async fn fetch_batch(&self, table_id: &str) -> Result<RowBatch>;
}

/// Registry of all connectors configured for this process.
pub struct ConnectorRegistry {
    connectors: Vec<Box<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
        }
    }

    /// Build a registry with every connector instance named in the
    /// config. Construction failures disable the one connector and are
    /// logged; they never abort startup.
    pub fn from_config(config: &Config) -> Self {
        use crate::connector_db::DatabaseConnector;
        use crate::connector_drive::DriveConnector;
        use crate::connector_fs::FilesystemConnector;

        let state_dir = &config.storage.state_dir;
        let mut registry = Self::new();

        for (name, cfg) in &config.connectors.filesystem {
            registry.register(Box::new(FilesystemConnector::new(
                name.clone(),
                cfg.clone(),
                state_dir,
            )));
        }
        for (name, cfg) in &config.connectors.drive {
            registry.register(Box::new(DriveConnector::new(
                name.clone(),
                cfg.clone(),
                state_dir,
            )));
        }
        for (name, cfg) in &config.connectors.database {
            match DatabaseConnector::new(name.clone(), cfg.clone(), state_dir) {
                Ok(connector) => registry.register(Box::new(connector)),
                Err(e) => {
                    tracing::error!(connector = %name, "skipping database connector: {e}");
                }
            }
        }

        registry
    }

    pub fn register(&mut self, connector: Box<dyn Connector>) {
        self.connectors.push(connector);
    }

    pub fn connectors(&self) -> &[Box<dyn Connector>] {
        &self.connectors
    }

    /// Resolve a connector by its exact source label (`"{type}:{name}"`).
    pub fn find(&self, source_label: &str) -> Option<&dyn Connector> {
        self.connectors
            .iter()
            .find(|c| c.source_label() == source_label)
            .map(|c| c.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
