//! Connector manager: fans discovery out across every registered
//! connector and fans acknowledgements back in.
//!
//! A scan cycle moves `IDLE → SCANNING → IDLE`: each connector's `scan`
//! runs in turn, a per-connector failure is recorded and skipped (never
//! aborting the others), results are cross-checked against the ledgers
//! and deduplicated into the queue.
//!
//! Two guarantees anchor the rest of the pipeline:
//!
//! - **One queue entry per item id** — enqueue dedup, backed by the
//!   queue's own persistence.
//! - **At-most-once ledger hand-off** — a connector's ledger is only
//!   advanced from [`mark_as_processed`], after the consumer confirms
//!   processing; never speculatively during a scan.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{CursorValue, ItemMetadata};
use crate::queue::ProcessingQueue;
use crate::traits::{Connector, ConnectorRegistry, Fetch};

pub struct Orchestrator {
    registry: ConnectorRegistry,
    queue: ProcessingQueue,
}

impl Orchestrator {
    pub fn new(registry: ConnectorRegistry, queue: ProcessingQueue) -> Self {
        Self { registry, queue }
    }

    /// Build the orchestrator from configuration: all configured
    /// connectors plus the persisted queue.
    pub fn from_config(config: &Config) -> Self {
        let registry = ConnectorRegistry::from_config(config);
        if registry.is_empty() {
            warn!("no connectors registered");
        }
        let queue = ProcessingQueue::open(config.storage.queue_path());
        Self { registry, queue }
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &[ItemMetadata] {
        self.queue.peek_all()
    }

    pub fn queued_item(&self, id: &str) -> Option<&ItemMetadata> {
        self.queue.get(id)
    }

    /// Scan every connector, isolating failures: one broken source only
    /// costs its own results.
    pub async fn scan_all(&self) -> Vec<ItemMetadata> {
        let mut all_items = Vec::new();

        for connector in self.registry.connectors() {
            let label = connector.source_label();
            match connector.scan().await {
                Ok(items) => {
                    info!(source = %label, found = items.len(), "scanned");
                    all_items.extend(items);
                }
                Err(e) => {
                    warn!(source = %label, "scan failed, continuing with other sources: {e}");
                }
            }
        }

        info!(total = all_items.len(), "scan cycle complete");
        all_items
    }

    /// Scan all sources and add unseen items to the processing queue.
    /// Returns the number of items actually added.
    pub async fn scan_and_queue(&mut self) -> Result<usize> {
        let items = self.scan_all().await;

        // Connectors filter against their own ledgers during scan; this
        // cross-check catches items a connector re-reports anyway.
        let fresh: Vec<ItemMetadata> = items
            .into_iter()
            .filter(|item| {
                match self.registry.find(&item.source) {
                    Some(connector) => !connector.processed_items().contains(&item.id),
                    None => true,
                }
            })
            .collect();

        let added = self.queue.enqueue(fresh)?;
        info!(added, "items queued for processing");
        Ok(added)
    }

    /// Confirm processing of a queued item: advance the owning
    /// connector's ledger, then drop the queue entry.
    ///
    /// The connector is resolved before the queue is touched, so an
    /// unregistered source leaves the entry queued and retryable.
    pub fn mark_as_processed(
        &mut self,
        item_id: &str,
        cursor: Option<CursorValue>,
    ) -> Result<ItemMetadata> {
        let item = self
            .queue
            .get(item_id)
            .ok_or_else(|| Error::ItemNotFound(item_id.to_string()))?;
        let source = item.source.clone();

        let connector = self
            .registry
            .find(&source)
            .ok_or_else(|| Error::SourceUnavailable(source.clone()))?;

        connector.mark_processed(item_id, cursor)?;

        let removed = self.queue.remove(item_id)?;
        info!(id = item_id, source = %source, "marked processed");
        // The entry was present above; a concurrent removal would be a
        // single-writer violation.
        removed.ok_or_else(|| Error::ItemNotFound(item_id.to_string()))
    }

    /// Download a queued item's raw bytes via its connector's fetch
    /// capability.
    pub async fn download_item(&self, item_id: &str, dest_dir: &Path) -> Result<PathBuf> {
        let item = self
            .queue
            .get(item_id)
            .ok_or_else(|| Error::ItemNotFound(item_id.to_string()))?;

        let connector = self
            .registry
            .find(&item.source)
            .ok_or_else(|| Error::SourceUnavailable(item.source.clone()))?;

        let fetch = connector.fetch().ok_or_else(|| {
            Error::read(
                item_id,
                format!("source '{}' does not support downloading", item.source),
            )
        })?;

        fetch.fetch(item, dest_dir).await
    }

    /// Download every queued item, optionally filtered by source label
    /// prefix (`"drive"` matches `"drive:shared"`). Failures are logged
    /// per item; successfully written paths are returned.
    pub async fn download_queue(
        &self,
        dest_dir: &Path,
        source_filter: Option<&str>,
    ) -> Vec<PathBuf> {
        let ids: Vec<String> = self
            .queue
            .peek_all()
            .iter()
            .filter(|item| match source_filter {
                Some(filter) => {
                    item.source == filter || item.source.starts_with(&format!("{filter}:"))
                }
                None => true,
            })
            .map(|item| item.id.clone())
            .collect();

        let mut paths = Vec::new();
        for id in ids {
            match self.download_item(&id, dest_dir).await {
                Ok(path) => paths.push(path),
                Err(e) => warn!(id = %id, "download failed: {e}"),
            }
        }
        paths
    }

    /// Per-source counts of the current queue contents.
    pub fn queue_by_source(&self) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for item in self.queue.peek_all() {
            *counts.entry(item.source.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Operator reset: drop the whole backlog.
    pub fn clear_queue(&mut self) -> Result<()> {
        self.queue.clear()
    }

    /// Flush the queue and every connector ledger. Safe to call
    /// repeatedly.
    pub fn close(&self) -> Result<()> {
        for connector in self.registry.connectors() {
            if let Err(e) = connector.close() {
                warn!(source = %connector.source_label(), "close failed: {e}");
            }
        }
        Ok(())
    }

    pub fn connector_for(&self, source_label: &str) -> Result<&dyn Connector> {
        self.registry
            .find(source_label)
            .ok_or_else(|| Error::SourceUnavailable(source_label.to_string()))
    }
}
