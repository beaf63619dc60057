//! Cloud-drive connector.
//!
//! Lists files from a Google Drive-compatible API with a single
//! server-side-filtered query per scan (parent folder + `trashed=false`),
//! paged via `nextPageToken`. Identity is the provider's file id, which
//! is stable across renames; the provider-supplied MD5 checksum is
//! attached when present. Raw bytes are downloaded on demand through the
//! [`Fetch`] capability (`alt=media`).
//!
//! # Authentication
//!
//! A bearer token is read from the `DRIVE_ACCESS_TOKEN` environment
//! variable. Tokens never appear in the config file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::config::DriveConnectorConfig;
use crate::error::{Error, Result};
use crate::ledger::{ledger_path, IdLedger};
use crate::models::{CursorValue, ItemKind, ItemMetadata};
use crate::traits::{Connector, Fetch};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const LIST_FIELDS: &str =
    "nextPageToken,files(id,name,mimeType,size,modifiedTime,md5Checksum,parents)";

pub struct DriveConnector {
    name: String,
    config: DriveConnectorConfig,
    ledger: Mutex<IdLedger>,
    client: reqwest::Client,
}

impl DriveConnector {
    pub fn new(name: String, config: DriveConnectorConfig, state_dir: &Path) -> Self {
        let label = format!("drive:{name}");
        let ledger = IdLedger::open(ledger_path(state_dir, &label));
        Self {
            name,
            config,
            ledger: Mutex::new(ledger),
            client: reqwest::Client::new(),
        }
    }

    fn token(&self) -> Option<String> {
        std::env::var("DRIVE_ACCESS_TOKEN").ok().filter(|t| !t.is_empty())
    }

    fn list_query(&self) -> String {
        match &self.config.folder_id {
            Some(folder) => format!("'{}' in parents and trashed = false", folder),
            None => "trashed = false".to_string(),
        }
    }

    /// One paged listing pass over the configured folder.
    async fn list_files(&self, token: &str) -> Result<Vec<DriveFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(format!("{}/files", self.config.endpoint))
                .bearer_auth(token)
                .query(&[
                    ("q", self.list_query().as_str()),
                    ("fields", LIST_FIELDS),
                    ("spaces", "drive"),
                ])
                .query(&[("pageSize", self.config.page_size)]);

            if let Some(ref pt) = page_token {
                request = request.query(&[("pageToken", pt.as_str())]);
            }

            let response = request.send().await.map_err(|e| Error::Connection {
                connector: self.source_label(),
                reason: e.to_string(),
            })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Connection {
                    connector: self.source_label(),
                    reason: format!(
                        "listing failed (HTTP {}): {}",
                        status,
                        body.chars().take(300).collect::<String>()
                    ),
                });
            }

            let json: Value = response.json().await.map_err(|e| Error::Connection {
                connector: self.source_label(),
                reason: format!("invalid listing response: {e}"),
            })?;

            if let Some(batch) = json.get("files").and_then(|f| f.as_array()) {
                for entry in batch {
                    match parse_file_entry(entry) {
                        Some(file) => files.push(file),
                        None => warn!(connector = %self.name, "skipping malformed listing entry"),
                    }
                }
            }

            match json.get("nextPageToken").and_then(|t| t.as_str()) {
                Some(next) => page_token = Some(next.to_string()),
                None => break,
            }
        }

        Ok(files)
    }
}

#[async_trait]
impl Connector for DriveConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "List and download files from a cloud drive folder"
    }

    fn connector_type(&self) -> &str {
        "drive"
    }

    async fn connect(&self) -> Result<bool> {
        let Some(token) = self.token() else {
            warn!(connector = %self.name, "DRIVE_ACCESS_TOKEN not set");
            return Ok(false);
        };

        // Probe the configured folder; without one, probe the about endpoint.
        let url = match &self.config.folder_id {
            Some(folder) => format!("{}/files/{}", self.config.endpoint, folder),
            None => format!("{}/about?fields=user", self.config.endpoint),
        };

        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| Error::Connection {
                connector: self.source_label(),
                reason: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            warn!(connector = %self.name, "configured folder not found");
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(Error::Connection {
                connector: self.source_label(),
                reason: format!("auth probe failed (HTTP {})", response.status()),
            });
        }
        Ok(true)
    }

    async fn scan(&self) -> Result<Vec<ItemMetadata>> {
        let Some(token) = self.token() else {
            warn!(connector = %self.name, "scan aborted, DRIVE_ACCESS_TOKEN not set");
            return Ok(Vec::new());
        };

        let files = match self.list_files(&token).await {
            Ok(files) => files,
            Err(e) => {
                warn!(connector = %self.name, "scan failed: {e}");
                return Ok(Vec::new());
            }
        };

        let processed = self.processed_items();
        let source = self.source_label();
        let mut items = Vec::new();

        for file in files {
            if file.mime_type == FOLDER_MIME {
                continue;
            }
            if processed.contains(&file.id) {
                continue;
            }

            let kind = kind_for(&file.name, &file.mime_type);
            let mut extra = serde_json::Map::new();
            extra.insert("mime_type".to_string(), file.mime_type.clone().into());
            if let Some(parents) = file.parents.clone() {
                extra.insert("parents".to_string(), parents.into());
            }

            items.push(ItemMetadata {
                id: file.id.clone(),
                name: file.name.clone(),
                location: format!("drive://{}", file.id),
                size: file.size,
                kind,
                last_modified: file.modified_time,
                source: source.clone(),
                checksum: file.md5_checksum.clone(),
                cursor: None,
                extra,
            });
        }

        info!(connector = %self.name, found = items.len(), "drive scan complete");
        Ok(items)
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

    fn fetch(&self) -> Option<&dyn Fetch> {
        Some(self)
    }
}

#[async_trait]
impl Fetch for DriveConnector {
    async fn fetch(&self, item: &ItemMetadata, dest_dir: &Path) -> Result<PathBuf> {
        let token = self.token().ok_or_else(|| Error::Connection {
            connector: self.source_label(),
            reason: "DRIVE_ACCESS_TOKEN not set".to_string(),
        })?;

        let url = format!("{}/files/{}?alt=media", self.config.endpoint, item.id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| Error::read(&item.id, e))?;

        if !response.status().is_success() {
            return Err(Error::read(
                &item.id,
                format!("download failed (HTTP {})", response.status()),
            ));
        }

        let bytes = response.bytes().await.map_err(|e| Error::read(&item.id, e))?;

        std::fs::create_dir_all(dest_dir)?;
        let dest = dest_dir.join(&item.name);
        std::fs::write(&dest, &bytes)?;
        info!(id = %item.id, dest = %dest.display(), "downloaded drive file");
        Ok(dest)
    }
}

/// One entry from the provider's file listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub modified_time: DateTime<Utc>,
    pub md5_checksum: Option<String>,
    pub parents: Option<Vec<String>>,
}

/// Parse one listing entry. The provider reports `size` as a string and
/// omits it entirely for native documents; both forms are accepted.
/// Returns `None` when the entry is missing its id or name.
pub fn parse_file_entry(entry: &Value) -> Option<DriveFile> {
    let id = entry.get("id")?.as_str()?.to_string();
    let name = entry.get("name")?.as_str()?.to_string();
    let mime_type = entry
        .get("mimeType")
        .and_then(|m| m.as_str())
        .unwrap_or("application/octet-stream")
        .to_string();

    let size = match entry.get("size") {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    };

    let modified_time = entry
        .get("modifiedTime")
        .and_then(|t| t.as_str())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| {
            warn!(file = %name, "missing or invalid modifiedTime, using now");
            Utc::now()
        });

    let md5_checksum = entry
        .get("md5Checksum")
        .and_then(|c| c.as_str())
        .map(str::to_string);

    let parents = entry.get("parents").and_then(|p| p.as_array()).map(|p| {
        p.iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    });

    Some(DriveFile {
        id,
        name,
        mime_type,
        size,
        modified_time,
        md5_checksum,
        parents,
    })
}

/// File kind from the extension, falling back to the MIME type for
/// extension-less native documents.
fn kind_for(name: &str, mime_type: &str) -> ItemKind {
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ItemKind::from_extension(ext),
        _ => ItemKind::from_mime(mime_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_entry() {
        let entry = json!({
            "id": "1AbC",
            "name": "report.pdf",
            "mimeType": "application/pdf",
            "size": "20480",
            "modifiedTime": "2024-03-01T08:30:00Z",
            "md5Checksum": "0cc175b9c0f1b6a8",
            "parents": ["folder1"]
        });
        let file = parse_file_entry(&entry).unwrap();
        assert_eq!(file.id, "1AbC");
        assert_eq!(file.size, 20480);
        assert_eq!(file.md5_checksum.as_deref(), Some("0cc175b9c0f1b6a8"));
        assert_eq!(file.parents, Some(vec!["folder1".to_string()]));
    }

    #[test]
    fn test_parse_entry_without_size_or_checksum() {
        // Native documents report no size and no md5Checksum.
        let entry = json!({
            "id": "2XyZ",
            "name": "Meeting notes",
            "mimeType": "application/vnd.google-apps.document",
            "modifiedTime": "2024-03-01T08:30:00Z"
        });
        let file = parse_file_entry(&entry).unwrap();
        assert_eq!(file.size, 0);
        assert!(file.md5_checksum.is_none());
    }

    #[test]
    fn test_parse_entry_missing_id_rejected() {
        assert!(parse_file_entry(&json!({"name": "x"})).is_none());
    }

    #[test]
    fn test_kind_prefers_extension_then_mime() {
        assert_eq!(kind_for("data.csv", "application/pdf"), ItemKind::Csv);
        assert_eq!(kind_for("Meeting notes", "text/plain"), ItemKind::Txt);
        assert_eq!(
            kind_for("archive", "application/octet-stream"),
            ItemKind::Other
        );
    }
}
