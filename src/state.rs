//! Per-file pipeline stage tracking and run bookkeeping.
//!
//! Every file moving through the pipeline gets a [`FileStageRecord`]
//! keyed by its content-derived id, holding the outcome of each stage in
//! the ordered sequence `read → chunk → embed → load`. Progress is
//! evaluated strictly in sequence: counting stops at the first stage that
//! failed or was never attempted, so a stray later success can never
//! inflate a file's progress.
//!
//! Run bookkeeping lives in the same store under the reserved
//! `pipeline_metadata` key: one record per run with start/completion
//! timestamps, status, and a summary snapshot. Every mutation persists
//! synchronously, which is what makes a killed process resumable — on
//! restart the tracker reports exactly the stages that completed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::store;

/// Ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Chunk,
    Embed,
    Load,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Read, Stage::Chunk, Stage::Embed, Stage::Load];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Read => "read",
            Stage::Chunk => "chunk",
            Stage::Embed => "embed",
            Stage::Load => "load",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage attempt for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStatus {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStageRecord {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub stages: BTreeMap<String, StageStatus>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<PipelineSummary>,
    /// Items handled per source during this run.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_run: Option<String>,
    #[serde(default)]
    pub runs: BTreeMap<String, RunRecord>,
}

/// On-disk shape: file records at the top level plus the reserved
/// `pipeline_metadata` key.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    pipeline_metadata: PipelineMetadata,
    #[serde(flatten)]
    files: BTreeMap<String, FileStageRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub total_files: usize,
    pub completed_files: usize,
    pub failed_files: usize,
    pub in_progress_files: usize,
    pub not_started_files: usize,
    /// Mean of per-file progress percentages, unweighted.
    pub overall_progress: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressStatus {
    NotStarted,
    InProgress,
    Completed,
    FailedAt(Stage),
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressStatus::NotStarted => f.write_str("not_started"),
            ProgressStatus::InProgress => f.write_str("in_progress"),
            ProgressStatus::Completed => f.write_str("completed"),
            ProgressStatus::FailedAt(stage) => write!(f, "failed_at_{stage}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileProgress {
    pub file_id: String,
    pub status: ProgressStatus,
    /// Percentage of the full stage sequence completed, 0–100.
    pub progress: f64,
    pub completed_stages: usize,
    pub total_stages: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FailedFile {
    pub file_id: String,
    pub failed_stage: Stage,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub struct StageTracker {
    path: PathBuf,
    state: StateFile,
}

impl StageTracker {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state: StateFile = store::load_or_default(&path);
        debug!(path = %path.display(), files = state.files.len(), "stage tracker opened");
        Self { path, state }
    }

    /// Upsert the outcome of `stage` for `file_id` and persist.
    ///
    /// Always refreshes `last_modified`; metadata entries are merged into
    /// the record rather than replacing it.
    pub fn update_file_state(
        &mut self,
        file_id: &str,
        stage: Stage,
        success: bool,
        error: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<()> {
        let now = Utc::now();
        let record = self
            .state
            .files
            .entry(file_id.to_string())
            .or_insert_with(|| FileStageRecord {
                started_at: now,
                stages: BTreeMap::new(),
                metadata: Map::new(),
                last_modified: now,
            });

        record.stages.insert(
            stage.as_str().to_string(),
            StageStatus {
                success,
                timestamp: now,
                error,
            },
        );
        if let Some(meta) = metadata {
            record.metadata.extend(meta);
        }
        record.last_modified = now;

        self.save()
    }

    /// Progress of one file, evaluated strictly along the stage sequence.
    pub fn get_file_progress(&self, file_id: &str) -> FileProgress {
        let total_stages = Stage::ALL.len();

        let Some(record) = self.state.files.get(file_id) else {
            return FileProgress {
                file_id: file_id.to_string(),
                status: ProgressStatus::NotStarted,
                progress: 0.0,
                completed_stages: 0,
                total_stages,
                started_at: None,
                last_modified: None,
            };
        };

        let mut completed_stages = 0;
        let mut failed_stage = None;

        for stage in Stage::ALL {
            match record.stages.get(stage.as_str()) {
                Some(status) if status.success => completed_stages += 1,
                Some(_) => {
                    // Attempted but failed: later successes don't count.
                    failed_stage = Some(stage);
                    break;
                }
                None => break,
            }
        }

        let progress = (completed_stages as f64 / total_stages as f64) * 100.0;
        let status = match failed_stage {
            Some(stage) => ProgressStatus::FailedAt(stage),
            None if completed_stages == total_stages => ProgressStatus::Completed,
            None if completed_stages == 0 => ProgressStatus::NotStarted,
            None => ProgressStatus::InProgress,
        };

        FileProgress {
            file_id: file_id.to_string(),
            status,
            progress,
            completed_stages,
            total_stages,
            started_at: Some(record.started_at),
            last_modified: Some(record.last_modified),
        }
    }

    pub fn get_pipeline_summary(&self) -> PipelineSummary {
        let mut summary = PipelineSummary {
            total_files: self.state.files.len(),
            completed_files: 0,
            failed_files: 0,
            in_progress_files: 0,
            not_started_files: 0,
            overall_progress: 0.0,
        };

        let mut progress_sum = 0.0;
        for file_id in self.state.files.keys() {
            let progress = self.get_file_progress(file_id);
            progress_sum += progress.progress;
            match progress.status {
                ProgressStatus::Completed => summary.completed_files += 1,
                ProgressStatus::FailedAt(_) => summary.failed_files += 1,
                ProgressStatus::InProgress => summary.in_progress_files += 1,
                ProgressStatus::NotStarted => summary.not_started_files += 1,
            }
        }

        if summary.total_files > 0 {
            summary.overall_progress = progress_sum / summary.total_files as f64;
        }
        summary
    }

    /// Open a new run record and make it current. Returns the run id.
    pub fn mark_pipeline_started(&mut self, run_id: Option<String>) -> Result<String> {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        self.state.pipeline_metadata.runs.insert(
            run_id.clone(),
            RunRecord {
                started_at: Utc::now(),
                completed_at: None,
                status: RunStatus::Running,
                summary: None,
                sources: BTreeMap::new(),
            },
        );
        self.state.pipeline_metadata.current_run = Some(run_id.clone());

        self.save()?;
        Ok(run_id)
    }

    /// Close a run record, attaching the summary snapshot. With no
    /// explicit `run_id` the current run is closed. Closing an unknown
    /// run is logged and ignored.
    pub fn mark_pipeline_completed(&mut self, run_id: Option<&str>, success: bool) -> Result<()> {
        let run_id = match run_id {
            Some(id) => id.to_string(),
            None => match &self.state.pipeline_metadata.current_run {
                Some(id) => id.clone(),
                None => {
                    warn!("cannot complete pipeline run: no run id and no current run");
                    return Ok(());
                }
            },
        };

        let summary = self.get_pipeline_summary();
        match self.state.pipeline_metadata.runs.get_mut(&run_id) {
            Some(record) => {
                record.completed_at = Some(Utc::now());
                record.status = if success {
                    RunStatus::Success
                } else {
                    RunStatus::Failed
                };
                record.summary = Some(summary);
                self.save()
            }
            None => {
                warn!(%run_id, "cannot complete pipeline run: unknown run");
                Ok(())
            }
        }
    }

    /// Attach per-source item counts to a run record.
    pub fn record_run_sources(
        &mut self,
        run_id: &str,
        sources: BTreeMap<String, u64>,
    ) -> Result<()> {
        if let Some(record) = self.state.pipeline_metadata.runs.get_mut(run_id) {
            record.sources = sources;
            return self.save();
        }
        Ok(())
    }

    /// Files whose progress stopped at a failed stage, with the first
    /// failure per file.
    pub fn get_failed_files(&self) -> Vec<FailedFile> {
        let mut failed = Vec::new();
        for (file_id, record) in &self.state.files {
            for stage in Stage::ALL {
                match record.stages.get(stage.as_str()) {
                    Some(status) if status.success => continue,
                    Some(status) => {
                        failed.push(FailedFile {
                            file_id: file_id.clone(),
                            failed_stage: stage,
                            error: status.error.clone(),
                            timestamp: status.timestamp,
                        });
                        break;
                    }
                    None => break,
                }
            }
        }
        failed
    }

    /// Files that completed every stage.
    pub fn get_successful_files(&self) -> Vec<String> {
        self.state
            .files
            .keys()
            .filter(|id| self.get_file_progress(id).status == ProgressStatus::Completed)
            .cloned()
            .collect()
    }

    /// Completion time of the most recently finished run, for the
    /// scheduler's interval gate.
    pub fn last_completed_run(&self) -> Option<DateTime<Utc>> {
        self.state
            .pipeline_metadata
            .runs
            .values()
            .filter_map(|r| r.completed_at)
            .max()
    }

    pub fn current_run(&self) -> Option<&str> {
        self.state.pipeline_metadata.current_run.as_deref()
    }

    pub fn runs(&self) -> &BTreeMap<String, RunRecord> {
        &self.state.pipeline_metadata.runs
    }

    /// Drop all file records and run history. Operator-only.
    pub fn reset(&mut self) -> Result<()> {
        self.state = StateFile::default();
        self.save()
    }

    fn save(&self) -> Result<()> {
        store::save_atomic(&self.path, &self.state)
    }
}
