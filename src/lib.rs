//! # docflow
//!
//! An incremental document-ingestion and retrieval-preparation pipeline.
//!
//! docflow pulls documents and rows from heterogeneous sources (local
//! filesystem, cloud drive, relational database), tracks which items have
//! already been processed across runs, extracts text, splits it into
//! retrievable chunks, and produces vector embeddings for downstream
//! semantic search. Its center of gravity is the incremental
//! state-tracking layer: durable per-connector ledgers, a deduplicated
//! processing queue, and a per-file stage tracker that make delivery
//! into the pipeline at-most-once and every partial failure resumable.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────────┐
//! │  Connectors  │──▶│ Orchestrator │──▶│ Processing queue │
//! │  fs/drive/db │   │ scan+filter  │   │  (queue.json)    │
//! └──────┬───────┘   └──────────────┘   └────────┬─────────┘
//!        │ ledgers/<source>.json                 │
//!        ▼                                       ▼
//! ┌──────────────┐   ┌──────────────────────────────────────┐
//! │  Scheduler   │──▶│ read → chunk → embed → load          │
//! │ (interval)   │   │ stage tracker (pipeline_state.json)  │
//! └──────────────┘   └──────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docflow scan                  # discover new items into the queue
//! docflow queue                 # inspect the backlog
//! docflow run                   # one full scan-extract-process cycle
//! docflow status                # per-file and aggregate progress
//! docflow schedule              # keep running on the configured interval
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Item metadata, kinds, and cursors |
//! | [`error`] | Typed error taxonomy |
//! | [`store`] | Atomic JSON persistence |
//! | [`ledger`] | Per-connector processed-item ledgers |
//! | [`queue`] | Durable deduplicated backlog |
//! | [`traits`] | Connector capability traits and registry |
//! | [`connector_fs`] | Filesystem connector |
//! | [`connector_drive`] | Cloud-drive connector |
//! | [`connector_db`] | Relational-table connector |
//! | [`reader`] | Text readers |
//! | [`chunk`] | Paragraph-boundary chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`state`] | Per-file stage tracking and run bookkeeping |
//! | [`orchestrator`] | Scan fan-out and acknowledgement fan-in |
//! | [`ingest`] | The full pipeline cycle |
//! | [`scheduler`] | Periodic background trigger |

pub mod chunk;
pub mod config;
pub mod connector_db;
pub mod connector_drive;
pub mod connector_fs;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod reader;
pub mod scheduler;
pub mod sources;
pub mod state;
pub mod store;
pub mod traits;
