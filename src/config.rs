use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for all persisted pipeline state.
    pub state_dir: PathBuf,
}

impl StorageConfig {
    pub fn queue_path(&self) -> PathBuf {
        self.state_dir.join("queue.json")
    }

    pub fn pipeline_state_path(&self) -> PathBuf {
        self.state_dir.join("pipeline_state.json")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.state_dir.join("output")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.state_dir.join("staging")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Minimum number of days between two completed runs.
    #[serde(default = "default_interval_days")]
    pub interval_days: i64,
    /// Optional time-of-day gate, `"HH:MM"`. Before this time no run
    /// fires even if the interval has elapsed.
    #[serde(default)]
    pub at: Option<String>,
    /// How often the trigger loop re-evaluates, in seconds.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_days: default_interval_days(),
            at: None,
            tick_secs: default_tick_secs(),
        }
    }
}

fn default_interval_days() -> i64 {
    2
}
fn default_tick_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    #[serde(default)]
    pub filesystem: BTreeMap<String, FilesystemConnectorConfig>,
    #[serde(default)]
    pub drive: BTreeMap<String, DriveConnectorConfig>,
    #[serde(default)]
    pub database: BTreeMap<String, DatabaseConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.csv".to_string(),
        "**/*.json".to_string(),
        "**/*.pdf".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriveConnectorConfig {
    /// Restrict listing to one folder. When unset the whole drive is
    /// queried (trashed items excluded either way).
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default = "default_drive_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_drive_endpoint() -> String {
    "https://www.googleapis.com/drive/v3".to_string()
}
fn default_page_size() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConnectorConfig {
    /// SQLite URL or path, e.g. `sqlite:data/app.db`.
    pub url: String,
    #[serde(default = "default_db_batch_size")]
    pub batch_size: usize,
    /// Restrict extraction to these tables; empty means all user tables.
    #[serde(default)]
    pub include_tables: Vec<String>,
}

fn default_db_batch_size() -> usize {
    1000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.scheduler.interval_days < 1 {
        anyhow::bail!("scheduler.interval_days must be >= 1");
    }
    if config.scheduler.tick_secs == 0 {
        anyhow::bail!("scheduler.tick_secs must be > 0");
    }
    if let Some(at) = &config.scheduler.at {
        chrono::NaiveTime::parse_from_str(at, "%H:%M")
            .map_err(|_| anyhow::anyhow!("scheduler.at must be HH:MM, got '{}'", at))?;
    }

    for (name, db) in &config.connectors.database {
        if db.url.trim().is_empty() {
            anyhow::bail!("connectors.database.{}.url must not be empty", name);
        }
        if db.batch_size == 0 {
            anyhow::bail!("connectors.database.{}.batch_size must be > 0", name);
        }
    }

    Ok(config)
}
