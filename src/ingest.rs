//! The full ingestion cycle: scan → queue → read → chunk → embed → load.
//!
//! One [`run_cycle`] call drives a complete pass: discovery fans out
//! through the orchestrator, then each queued item is pushed through the
//! pipeline while the stage tracker records every outcome. An item is
//! acknowledged back to its connector (ledger advance + queue removal)
//! only after every attempted stage succeeded; anything less leaves the
//! entry queued for the next cycle.
//!
//! A failed stage does not block later stages for the same file: the
//! failure is recorded and the remaining stages still run (an embedder
//! handed no chunks embeds nothing). Only a read failure stops work on
//! a file — there is no content to continue with. With embeddings
//! disabled the embed and load stages are skipped entirely and never
//! recorded.

use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::chunk::{Chunker, ParagraphChunker};
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{Error, Result};
use crate::models::{CursorValue, ItemKind, ItemMetadata};
use crate::orchestrator::Orchestrator;
use crate::reader::{reader_for, Document};
use crate::state::{Stage, StageTracker};
use crate::store;
use crate::traits::{Connector, Tabular};

/// Outcome of one full cycle.
#[derive(Debug)]
pub struct CycleStats {
    pub run_id: String,
    /// Items newly discovered and queued this cycle.
    pub queued: usize,
    /// Items fully processed and acknowledged.
    pub processed: u64,
    /// Items that recorded a stage failure and stayed queued.
    pub failed: u64,
    /// Processed-item counts per source.
    pub by_source: BTreeMap<String, u64>,
}

/// Run one scan-extract-process cycle.
pub async fn run_cycle(
    config: &Config,
    orch: &mut Orchestrator,
    tracker: &mut StageTracker,
) -> Result<CycleStats> {
    let run_id = tracker.mark_pipeline_started(None)?;
    info!(%run_id, "pipeline run started");

    let queued = orch.scan_and_queue().await?;

    let chunker = ParagraphChunker::new(config.chunking.max_tokens);
    let embedder = if config.embedding.is_enabled() {
        match create_embedder(&config.embedding) {
            Ok(embedder) => Some(embedder),
            Err(e) => {
                tracker.mark_pipeline_completed(Some(&run_id), false)?;
                return Err(e);
            }
        }
    } else {
        None
    };

    let items: Vec<ItemMetadata> = orch.queue().to_vec();
    let mut stats = CycleStats {
        run_id: run_id.clone(),
        queued,
        processed: 0,
        failed: 0,
        by_source: BTreeMap::new(),
    };

    for item in items {
        match process_item(config, orch, tracker, &chunker, embedder.as_deref(), &item).await {
            Ok(outcome) if outcome.clean => {
                match orch.mark_as_processed(&item.id, outcome.cursor) {
                    Ok(_) => {
                        stats.processed += 1;
                        *stats.by_source.entry(item.source.clone()).or_insert(0) += 1;
                    }
                    Err(e) => {
                        warn!(id = %item.id, "processed but not acknowledged: {e}");
                        stats.failed += 1;
                    }
                }
            }
            Ok(_) => {
                warn!(id = %item.id, "stage failures recorded, will retry next cycle");
                stats.failed += 1;
            }
            Err(e) => {
                warn!(id = %item.id, "item failed, will retry next cycle: {e}");
                stats.failed += 1;
            }
        }
    }

    tracker.record_run_sources(&run_id, stats.by_source.clone())?;
    tracker.mark_pipeline_completed(Some(&run_id), stats.failed == 0)?;
    orch.close()?;

    info!(
        %run_id,
        queued = stats.queued,
        processed = stats.processed,
        failed = stats.failed,
        "pipeline run complete"
    );
    Ok(stats)
}

/// What one trip through the stage sequence produced.
struct ItemOutcome {
    /// Cursor to acknowledge with (tables only).
    cursor: Option<CursorValue>,
    /// Every attempted stage succeeded; the item may be acknowledged.
    clean: bool,
}

/// Push one item through the stage sequence, recording each outcome.
///
/// A chunk or embed failure is recorded and the remaining stages still
/// run on whatever is available; only a read failure returns early,
/// since nothing downstream has input without content.
async fn process_item(
    config: &Config,
    orch: &Orchestrator,
    tracker: &mut StageTracker,
    chunker: &dyn Chunker,
    embedder: Option<&dyn Embedder>,
    item: &ItemMetadata,
) -> Result<ItemOutcome> {
    let file_id = item.id.as_str();
    let mut clean = true;

    // ---- read ----
    let (document, cursor) = match read_item(config, orch, item).await {
        Ok(read) => {
            let mut meta = serde_json::Map::new();
            meta.insert("file_name".to_string(), item.name.clone().into());
            meta.insert("source".to_string(), item.source.clone().into());
            meta.extend(read.0.metadata.clone());
            tracker.update_file_state(file_id, Stage::Read, true, None, Some(meta))?;
            read
        }
        Err(e) => {
            tracker.update_file_state(file_id, Stage::Read, false, Some(e.to_string()), None)?;
            return Err(e);
        }
    };

    // ---- chunk ----
    let chunks = match chunker.chunk(&document) {
        Ok(chunks) => {
            let mut meta = serde_json::Map::new();
            meta.insert("chunk_count".to_string(), chunks.len().into());
            tracker.update_file_state(file_id, Stage::Chunk, true, None, Some(meta))?;
            chunks
        }
        Err(e) => {
            let err = Error::Chunking {
                item: file_id.to_string(),
                reason: e.to_string(),
            };
            tracker.update_file_state(file_id, Stage::Chunk, false, Some(err.to_string()), None)?;
            warn!(id = %item.id, "chunking failed, continuing with no chunks: {err}");
            clean = false;
            Vec::new()
        }
    };

    // Embed and load only run with a configured provider; otherwise the
    // stages are simply never recorded.
    let Some(embedder) = embedder else {
        return Ok(ItemOutcome { cursor, clean });
    };

    // ---- embed ----
    let vectors = match embedder.embed(&chunks).await {
        Ok(vectors) => {
            tracker.update_file_state(file_id, Stage::Embed, true, None, None)?;
            vectors
        }
        Err(e) => {
            tracker.update_file_state(file_id, Stage::Embed, false, Some(e.to_string()), None)?;
            warn!(id = %item.id, "embedding failed, continuing with no vectors: {e}");
            clean = false;
            Vec::new()
        }
    };

    // ---- load ----
    let artifact = serde_json::json!({
        "file_id": file_id,
        "name": item.name,
        "source": item.source,
        "model": embedder.model_name(),
        "dims": embedder.dims(),
        "chunks": chunks
            .iter()
            .zip(vectors.iter())
            .enumerate()
            .map(|(index, (text, vector))| serde_json::json!({
                "index": index,
                "text": text,
                "vector": vector,
            }))
            .collect::<Vec<_>>(),
    });
    let output_path = config
        .storage
        .output_dir()
        .join(format!("{}.json", file_id.replace(['/', ':'], "-")));

    match store::save_atomic(&output_path, &artifact) {
        Ok(()) => {
            tracker.update_file_state(file_id, Stage::Load, true, None, None)?;
        }
        Err(e) => {
            tracker.update_file_state(file_id, Stage::Load, false, Some(e.to_string()), None)?;
            clean = false;
        }
    }

    Ok(ItemOutcome { cursor, clean })
}

/// Resolve an item's content: table items pull a row batch through the
/// tabular capability; file items read locally or fetch first.
async fn read_item(
    config: &Config,
    orch: &Orchestrator,
    item: &ItemMetadata,
) -> Result<(Document, Option<CursorValue>)> {
    if item.kind == ItemKind::Table {
        let connector = orch.connector_for(&item.source)?;
        let tabular = connector.tabular().ok_or_else(|| {
            Error::read(&item.id, "source has no tabular capability")
        })?;
        let batch = tabular.fetch_batch(&item.id).await?;
        let document = Document::from_rows(&item.id, &batch.rows);
        return Ok((document, batch.latest_key));
    }

    let local = std::path::Path::new(&item.location);
    let path = if local.exists() {
        local.to_path_buf()
    } else {
        // Remote item: fetch into the staging area first.
        orch.download_item(&item.id, &config.storage.staging_dir())
            .await?
    };

    let reader = reader_for(item.kind).ok_or_else(|| {
        Error::read(
            &item.id,
            format!("no reader registered for kind '{:?}'", item.kind),
        )
    })?;

    let document = reader.read(&path)?;
    Ok((document, None))
}
