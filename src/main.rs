//! # docflow CLI
//!
//! The `docflow` binary drives the ingestion pipeline. Every command
//! accepts a `--config` flag pointing to a TOML configuration file and
//! maps directly onto one orchestrator or tracker operation, returning
//! exit code 0 on success and 1 when the requested operation fails.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docflow sources` | List connectors and their health status |
//! | `docflow scan` | Scan all sources and queue new items |
//! | `docflow queue` | List the processing backlog |
//! | `docflow mark <id>` | Mark a queued item as processed |
//! | `docflow clear` | Empty the processing queue |
//! | `docflow download [id]` | Download queued items via their connectors |
//! | `docflow run` | One full scan-extract-process cycle |
//! | `docflow status` | Pipeline summary and failed files |
//! | `docflow reset` | Drop all per-file stage state |
//! | `docflow schedule` | Run the periodic trigger until interrupted |
//!
//! ## Examples
//!
//! ```bash
//! # Discover new items across all configured sources
//! docflow scan --config ./config/docflow.toml
//!
//! # Process the backlog once
//! docflow run --config ./config/docflow.toml
//!
//! # Acknowledge a table batch, advancing its cursor
//! docflow mark orders --cursor 1000
//!
//! # Keep running on the configured interval
//! docflow schedule --config ./config/docflow.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use docflow::config;
use docflow::ingest;
use docflow::models::CursorValue;
use docflow::orchestrator::Orchestrator;
use docflow::scheduler::Scheduler;
use docflow::sources;
use docflow::state::StageTracker;

/// docflow — an incremental document-ingestion and
/// retrieval-preparation pipeline.
#[derive(Parser)]
#[command(
    name = "docflow",
    about = "docflow — incremental document ingestion for retrieval pipelines",
    version,
    long_about = "docflow pulls documents and rows from heterogeneous sources (filesystem, \
    cloud drive, relational database), tracks processed items across runs, and pushes new \
    content through a read → chunk → embed → load pipeline with durable per-stage state."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List configured connectors and their health status.
    Sources,

    /// Scan all sources and add unprocessed items to the queue.
    ///
    /// Each connector applies its own incremental filter; a failing
    /// source is skipped without aborting the others.
    Scan,

    /// List the current processing queue.
    Queue,

    /// Mark a queued item as processed.
    ///
    /// Advances the owning connector's ledger and removes the queue
    /// entry. Cursor-based sources take `--cursor` to move their
    /// high-water mark.
    Mark {
        /// Queue entry id.
        id: String,

        /// New cursor value for ordered sources (integer, RFC-3339
        /// timestamp, or text).
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Empty the processing queue. Irreversible.
    Clear,

    /// Download queued items via their source connectors.
    Download {
        /// Download a single queue entry; omit to download everything.
        id: Option<String>,

        /// Destination directory. Defaults to the staging area.
        #[arg(long)]
        dest: Option<PathBuf>,

        /// Only download items from this source (label or type).
        #[arg(long)]
        source: Option<String>,
    },

    /// Run one full scan-extract-process cycle now.
    Run,

    /// Print the pipeline summary and any failed files.
    Status,

    /// Drop all per-file stage state and run history. Irreversible.
    Reset,

    /// Run the periodic trigger in the foreground until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docflow=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Sources => {
            let orch = Orchestrator::from_config(&cfg);
            sources::list_sources(&orch).await;
        }
        Commands::Scan => {
            let mut orch = Orchestrator::from_config(&cfg);
            let added = orch.scan_and_queue().await?;
            orch.close()?;
            println!("scan complete");
            println!("  new items queued: {}", added);
            println!("  queue size: {}", orch.queue().len());
        }
        Commands::Queue => {
            let orch = Orchestrator::from_config(&cfg);
            let items = orch.queue();
            if items.is_empty() {
                println!("Processing queue is empty.");
            } else {
                println!("Processing queue ({} items):", items.len());
                for (i, item) in items.iter().enumerate() {
                    println!(
                        "{}. [{}] {} (id: {})",
                        i + 1,
                        item.source,
                        item.name,
                        item.id
                    );
                }
            }
        }
        Commands::Mark { id, cursor } => {
            let mut orch = Orchestrator::from_config(&cfg);
            let cursor = cursor.map(|c| CursorValue::parse(&c));
            let item = orch.mark_as_processed(&id, cursor)?;
            orch.close()?;
            println!("marked processed: {} ({})", item.id, item.source);
        }
        Commands::Clear => {
            let mut orch = Orchestrator::from_config(&cfg);
            let size = orch.queue().len();
            orch.clear_queue()?;
            println!("queue cleared ({} items dropped)", size);
        }
        Commands::Download { id, dest, source } => {
            let orch = Orchestrator::from_config(&cfg);
            let dest = dest.unwrap_or_else(|| cfg.storage.staging_dir());
            match id {
                Some(id) => {
                    let path = orch.download_item(&id, &dest).await?;
                    println!("downloaded {} -> {}", id, path.display());
                }
                None => {
                    let paths = orch.download_queue(&dest, source.as_deref()).await;
                    println!("downloaded {} items to {}", paths.len(), dest.display());
                }
            }
        }
        Commands::Run => {
            let mut orch = Orchestrator::from_config(&cfg);
            let mut tracker = StageTracker::open(cfg.storage.pipeline_state_path());
            let stats = ingest::run_cycle(&cfg, &mut orch, &mut tracker).await?;
            println!("run {}", stats.run_id);
            println!("  queued: {}", stats.queued);
            println!("  processed: {}", stats.processed);
            println!("  failed: {}", stats.failed);
            for (source, count) in &stats.by_source {
                println!("  {}: {}", source, count);
            }
        }
        Commands::Status => {
            let tracker = StageTracker::open(cfg.storage.pipeline_state_path());
            let summary = tracker.get_pipeline_summary();
            println!("pipeline status");
            println!("  total files: {}", summary.total_files);
            println!("  completed: {}", summary.completed_files);
            println!("  in progress: {}", summary.in_progress_files);
            println!("  failed: {}", summary.failed_files);
            println!("  not started: {}", summary.not_started_files);
            println!("  overall progress: {:.1}%", summary.overall_progress);

            let failed = tracker.get_failed_files();
            if !failed.is_empty() {
                println!("failed files:");
                for f in failed {
                    println!(
                        "  {} at {} ({})",
                        f.file_id,
                        f.failed_stage,
                        f.error.unwrap_or_else(|| "no error recorded".to_string())
                    );
                }
            }

            if let Some(last) = tracker.last_completed_run() {
                println!("last completed run: {}", last.to_rfc3339());
            }
        }
        Commands::Reset => {
            let mut tracker = StageTracker::open(cfg.storage.pipeline_state_path());
            tracker.reset()?;
            println!("pipeline state reset");
        }
        Commands::Schedule => {
            println!(
                "scheduler started (every {} day(s){}), ctrl-c to stop",
                cfg.scheduler.interval_days,
                cfg.scheduler
                    .at
                    .as_deref()
                    .map(|at| format!(" at {at}"))
                    .unwrap_or_default()
            );
            let scheduler = Scheduler::start(cfg.clone());
            tokio::signal::ctrl_c().await?;
            println!("stopping scheduler...");
            if scheduler.stop(Duration::from_secs(60)).await {
                println!("scheduler stopped");
            } else {
                println!("scheduler did not stop in time; state remains consistent");
            }
        }
    }

    Ok(())
}
