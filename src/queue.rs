//! Durable, deduplicated processing queue.
//!
//! The queue decouples discovery (scan) from consumption (download and
//! process): a scan may run many times before a consumer drains the
//! backlog. Entries are whole [`ItemMetadata`] values keyed by `id`, with
//! at most one entry per id at any time. Every mutation rewrites the full
//! queue file synchronously; queue sizes stay bounded by human-scale
//! document counts.
//!
//! The queue does not consult any ledger: filtering already-processed
//! items is the orchestrator's job, which keeps scan-and-filter and
//! enqueue-dedup independently testable.

use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::ItemMetadata;
use crate::store;

#[derive(Debug)]
pub struct ProcessingQueue {
    path: PathBuf,
    items: Vec<ItemMetadata>,
}

impl ProcessingQueue {
    /// Open the queue at `path`, loading the persisted backlog if present.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items: Vec<ItemMetadata> = store::load_or_default(&path);
        debug!(path = %path.display(), items = items.len(), "queue opened");
        Self { path, items }
    }

    /// Add items whose ids are not already queued. Returns the number
    /// actually added. Discovery order is preserved.
    pub fn enqueue(&mut self, items: Vec<ItemMetadata>) -> Result<usize> {
        let mut added = 0;
        for item in items {
            if self.items.iter().any(|queued| queued.id == item.id) {
                debug!(id = %item.id, "already queued, skipping");
                continue;
            }
            self.items.push(item);
            added += 1;
        }
        if added > 0 {
            self.save()?;
        }
        info!(added, total = self.items.len(), "queue updated");
        Ok(added)
    }

    pub fn peek_all(&self) -> &[ItemMetadata] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&ItemMetadata> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Pop the entry with `id`, or `None` if absent (not an error).
    pub fn remove(&mut self, id: &str) -> Result<Option<ItemMetadata>> {
        let Some(pos) = self.items.iter().position(|item| item.id == id) else {
            return Ok(None);
        };
        let item = self.items.remove(pos);
        self.save()?;
        Ok(Some(item))
    }

    /// Empty the queue. Operator-only; irreversible.
    pub fn clear(&mut self) -> Result<()> {
        self.items.clear();
        self.save()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn save(&self) -> Result<()> {
        store::save_atomic(&self.path, &self.items)
    }
}
