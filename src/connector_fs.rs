//! Local filesystem connector.
//!
//! Recursively walks a root directory, filters by include/exclude globs,
//! and reports files the ledger has not seen. Identity is a hash of the
//! relative path combined with the modification time, so a file edited in
//! place shows up as a *new* item — re-processing an edit is preferred
//! over missing it. The content checksum (SHA-256) travels with the item
//! for downstream dedup but is never the processed-marker key.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use std::sync::Mutex;
use std::time::UNIX_EPOCH;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::FilesystemConnectorConfig;
use crate::error::Result;
use crate::ledger::{ledger_path, IdLedger};
use crate::models::{CursorValue, ItemKind, ItemMetadata};
use crate::traits::Connector;

pub struct FilesystemConnector {
    name: String,
    config: FilesystemConnectorConfig,
    ledger: Mutex<IdLedger>,
}

impl FilesystemConnector {
    pub fn new(name: String, config: FilesystemConnectorConfig, state_dir: &Path) -> Self {
        let label = format!("filesystem:{name}");
        let ledger = IdLedger::open(ledger_path(state_dir, &label));
        Self {
            name,
            config,
            ledger: Mutex::new(ledger),
        }
    }

    fn scan_root(&self) -> AnyResult<Vec<ItemMetadata>> {
        let root = &self.config.root;
        let include_set = build_globset(&self.config.include_globs)?;

        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(self.config.exclude_globs.clone());
        let exclude_set = build_globset(&default_excludes)?;

        let processed = self.processed_items();
        let mut items = Vec::new();

        let walker = WalkDir::new(root).follow_links(self.config.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(connector = %self.name, "skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if exclude_set.is_match(&rel_str) {
                continue;
            }
            if !include_set.is_match(&rel_str) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), "skipping file, cannot stat: {e}");
                    continue;
                }
            };
            let mtime_secs = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            let id = file_id(&rel_str, mtime_secs);
            if processed.contains(&id) {
                continue;
            }

            let checksum = match file_checksum(path) {
                Ok(sum) => Some(sum),
                Err(e) => {
                    warn!(path = %path.display(), "checksum failed: {e}");
                    None
                }
            };

            let kind = path
                .extension()
                .map(|ext| ItemKind::from_extension(&ext.to_string_lossy()))
                .unwrap_or(ItemKind::Other);

            let mut extra = serde_json::Map::new();
            extra.insert("relative_path".to_string(), rel_str.clone().into());

            items.push(ItemMetadata {
                id,
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                location: path.to_string_lossy().to_string(),
                size: metadata.len(),
                kind,
                last_modified: timestamp_to_utc(mtime_secs),
                source: self.source_label(),
                checksum,
                cursor: None,
                extra,
            });
        }

        // Deterministic ordering across scans
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }
}

#[async_trait]
impl Connector for FilesystemConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Scan a local directory tree for documents"
    }

    fn connector_type(&self) -> &str {
        "filesystem"
    }

    async fn connect(&self) -> Result<bool> {
        let root = &self.config.root;

        if !root.exists() {
            info!(root = %root.display(), "root missing, attempting to create");
            if let Err(e) = std::fs::create_dir_all(root) {
                warn!(root = %root.display(), "could not create root: {e}");
                return Ok(false);
            }
            return Ok(true);
        }

        if !root.is_dir() {
            warn!(root = %root.display(), "root exists but is not a directory");
            return Ok(false);
        }

        match std::fs::read_dir(root) {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(root = %root.display(), "root not readable: {e}");
                Ok(false)
            }
        }
    }

    async fn scan(&self) -> Result<Vec<ItemMetadata>> {
        if !self.connect().await? {
            warn!(connector = %self.name, "scan aborted, root unavailable");
            return Ok(Vec::new());
        }

        match self.scan_root() {
            Ok(items) => {
                info!(connector = %self.name, found = items.len(), "filesystem scan complete");
                Ok(items)
            }
            Err(e) => {
                warn!(connector = %self.name, "scan failed: {e}");
                Ok(Vec::new())
            }
        }
    }

    fn processed_items(&self) -> BTreeSet<String> {
        self.ledger.lock().expect("ledger lock").ids().clone()
    }

    fn mark_processed(&self, item_id: &str, _cursor: Option<CursorValue>) -> Result<()> {
        self.ledger.lock().expect("ledger lock").mark_processed(item_id)
    }

    fn close(&self) -> Result<()> {
        self.ledger.lock().expect("ledger lock").flush()
    }
}

/// Stable item id: first 16 hex chars of the relative-path hash, joined
/// with the mtime in seconds. Same path + same mtime → same id; an edit
/// moves the mtime and yields a fresh id.
pub fn file_id(relative_path: &str, mtime_secs: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(relative_path.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}_{}", &digest[..16], mtime_secs)
}

/// SHA-256 of the file contents, read in chunks to handle large files.
fn file_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn timestamp_to_utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}

fn build_globset(patterns: &[String]) -> AnyResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn connector(root: &Path, state: &Path) -> FilesystemConnector {
        FilesystemConnector::new(
            "docs".to_string(),
            FilesystemConnectorConfig {
                root: root.to_path_buf(),
                include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
                exclude_globs: vec![],
                follow_symlinks: false,
            },
            state,
        )
    }

    #[test]
    fn test_file_id_changes_with_mtime() {
        let a = file_id("docs/readme.md", 1_700_000_000);
        let b = file_id("docs/readme.md", 1_700_000_060);
        let c = file_id("docs/other.md", 1_700_000_000);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, file_id("docs/readme.md", 1_700_000_000));
    }

    #[tokio::test]
    async fn test_scan_finds_matching_files() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("files");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a.md"), "alpha").unwrap();
        std::fs::write(root.join("sub/b.txt"), "beta").unwrap();
        std::fs::write(root.join("c.log"), "ignored").unwrap();

        let state = tmp.path().join("state");
        let connector = connector(&root, &state);

        let items = connector.scan().await.unwrap();
        assert_eq!(items.len(), 2);
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert!(names.contains(&"a.md"));
        assert!(names.contains(&"b.txt"));
        assert!(items.iter().all(|i| i.source == "filesystem:docs"));
        assert!(items.iter().all(|i| i.checksum.is_some()));
    }

    #[tokio::test]
    async fn test_scan_filters_against_own_ledger() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("files");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.md"), "alpha").unwrap();

        let state = tmp.path().join("state");
        let connector = connector(&root, &state);

        let items = connector.scan().await.unwrap();
        assert_eq!(items.len(), 1);
        connector.mark_processed(&items[0].id, None).unwrap();

        let rescan = connector.scan().await.unwrap();
        assert!(rescan.is_empty());
        assert!(connector.processed_items().contains(&items[0].id));
    }

    #[tokio::test]
    async fn test_connect_creates_missing_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("not-yet");
        let state = tmp.path().join("state");
        let connector = connector(&root, &state);

        assert!(connector.connect().await.unwrap());
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_marks_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("files");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.md"), "alpha").unwrap();
        let state = tmp.path().join("state");

        let id = {
            let c = connector(&root, &state);
            let items = c.scan().await.unwrap();
            c.mark_processed(&items[0].id, None).unwrap();
            items[0].id.clone()
        };

        let reopened = connector(&root, &state);
        assert!(reopened.processed_items().contains(&id));
        assert!(reopened.scan().await.unwrap().is_empty());
    }
}
