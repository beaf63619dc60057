//! Core data types that flow between connectors, the queue, and the pipeline.
//!
//! [`ItemMetadata`] is the unit of discovery: one per file or table,
//! produced by a connector scan and persisted verbatim in the processing
//! queue. Its JSON form is a stable on-disk contract — every field must
//! round-trip losslessly, including the enum-valued `kind` (serialized as
//! its lowercase string) and timestamps (ISO-8601).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of item a connector discovered.
///
/// File kinds map to extensions; `Table` marks an incremental batch of
/// rows from a relational source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Csv,
    Json,
    Xlsx,
    Pdf,
    Txt,
    Table,
    Other,
}

impl ItemKind {
    pub fn from_extension(extension: &str) -> Self {
        match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "csv" => ItemKind::Csv,
            "json" => ItemKind::Json,
            "xlsx" => ItemKind::Xlsx,
            "pdf" => ItemKind::Pdf,
            "txt" | "md" | "text" => ItemKind::Txt,
            _ => ItemKind::Other,
        }
    }

    /// Fallback mapping for sources that report a MIME type but no
    /// usable file extension (cloud-drive native documents).
    pub fn from_mime(mime: &str) -> Self {
        match mime {
            "text/csv" => ItemKind::Csv,
            "application/json" => ItemKind::Json,
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel" => ItemKind::Xlsx,
            "application/pdf" => ItemKind::Pdf,
            "text/plain" | "text/markdown" => ItemKind::Txt,
            _ => ItemKind::Other,
        }
    }
}

/// A monotonically comparable change-detection value for ordered sources.
///
/// Variants are untagged in JSON: numbers deserialize as `Int`, RFC-3339
/// strings as `Timestamp`, anything else as `Text`. Comparison is only
/// defined within a variant — a cursor never "advances" across types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CursorValue {
    Int(i64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl CursorValue {
    /// Whether this value moves past `prior`. A missing prior mark always
    /// advances.
    pub fn advances(&self, prior: Option<&CursorValue>) -> bool {
        match prior {
            None => true,
            Some(p) => match (self, p) {
                (CursorValue::Int(a), CursorValue::Int(b)) => a > b,
                (CursorValue::Timestamp(a), CursorValue::Timestamp(b)) => a > b,
                (CursorValue::Text(a), CursorValue::Text(b)) => a > b,
                _ => false,
            },
        }
    }

    /// Parse a cursor from operator input: integer, RFC-3339 timestamp,
    /// or opaque text, in that order.
    pub fn parse(input: &str) -> Self {
        if let Ok(n) = input.parse::<i64>() {
            return CursorValue::Int(n);
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
            return CursorValue::Timestamp(ts.with_timezone(&Utc));
        }
        CursorValue::Text(input.to_string())
    }
}

impl std::fmt::Display for CursorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CursorValue::Int(n) => write!(f, "{}", n),
            CursorValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            CursorValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Metadata for one discovered item, produced by a connector scan.
///
/// `id` is stable across scans of the same physical item: connectors
/// derive it from provider ids (cloud drive), table names (database), or
/// a path-hash + mtime pair (filesystem, where an in-place edit yields a
/// new id and the edit is re-processed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub id: String,
    pub name: String,
    /// Human-readable locator: absolute path, `drive://<id>`, or a
    /// database URL.
    pub location: String,
    pub size: u64,
    pub kind: ItemKind,
    pub last_modified: DateTime<Utc>,
    /// `source_label()` of the owning connector.
    pub source: String,
    /// Content hash for downstream dedup, when the source provides one.
    /// Not used as the processed-marker key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Last processed high-water mark for cursor-based sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorValue>,
    /// Opaque per-source extras.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_item() -> ItemMetadata {
        let mut extra = Map::new();
        extra.insert("relative_path".to_string(), Value::from("docs/a.md"));
        ItemMetadata {
            id: "3f2a9c1d_1700000000".to_string(),
            name: "a.md".to_string(),
            location: "/data/docs/a.md".to_string(),
            size: 420,
            kind: ItemKind::Txt,
            last_modified: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            source: "filesystem:docs".to_string(),
            checksum: Some("deadbeef".to_string()),
            cursor: None,
            extra,
        }
    }

    #[test]
    fn test_round_trip_full() {
        let item = sample_item();
        let json = serde_json::to_string(&item).unwrap();
        let back: ItemMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(item, back);
    }

    #[test]
    fn test_round_trip_minimal() {
        let mut item = sample_item();
        item.checksum = None;
        item.extra = Map::new();
        item.cursor = Some(CursorValue::Int(1000));
        let json = serde_json::to_value(&item).unwrap();
        assert!(json.get("checksum").is_none());
        let back: ItemMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(item, back);
    }

    #[test]
    fn test_kind_serializes_as_string() {
        let json = serde_json::to_value(ItemKind::Xlsx).unwrap();
        assert_eq!(json, Value::from("xlsx"));
        let back: ItemKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, ItemKind::Xlsx);
    }

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(ItemKind::from_extension("CSV"), ItemKind::Csv);
        assert_eq!(ItemKind::from_extension(".md"), ItemKind::Txt);
        assert_eq!(ItemKind::from_extension("docx"), ItemKind::Other);
    }

    #[test]
    fn test_cursor_untagged_round_trip() {
        let int = CursorValue::Int(42);
        let json = serde_json::to_value(&int).unwrap();
        assert_eq!(json, Value::from(42));
        assert_eq!(serde_json::from_value::<CursorValue>(json).unwrap(), int);

        let ts = CursorValue::Timestamp(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        let json = serde_json::to_value(&ts).unwrap();
        assert_eq!(serde_json::from_value::<CursorValue>(json).unwrap(), ts);

        let text = CursorValue::Text("batch-07".to_string());
        let json = serde_json::to_value(&text).unwrap();
        assert_eq!(serde_json::from_value::<CursorValue>(json).unwrap(), text);
    }

    #[test]
    fn test_cursor_advances() {
        let prior = CursorValue::Int(1000);
        assert!(CursorValue::Int(1001).advances(Some(&prior)));
        assert!(!CursorValue::Int(1000).advances(Some(&prior)));
        assert!(!CursorValue::Text("x".into()).advances(Some(&prior)));
        assert!(CursorValue::Int(1).advances(None));
    }

    #[test]
    fn test_cursor_parse() {
        assert_eq!(CursorValue::parse("17"), CursorValue::Int(17));
        assert!(matches!(
            CursorValue::parse("2024-05-01T00:00:00Z"),
            CursorValue::Timestamp(_)
        ));
        assert_eq!(
            CursorValue::parse("order-9"),
            CursorValue::Text("order-9".to_string())
        );
    }
}
