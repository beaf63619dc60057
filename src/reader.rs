//! Reader collaborator: raw bytes or rows → normalized [`Document`].
//!
//! The pipeline consumes readers through the [`Reader`] trait; which
//! formats get real extraction is a deployment concern. The built-in
//! reader handles plain-text formats (txt, md, csv, json); binary
//! formats report a read error and the item is skipped, never aborting
//! the batch.

use serde_json::{Map, Value};
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::ItemKind;

/// Normalized text content plus reader-supplied metadata.
#[derive(Debug, Clone)]
pub struct Document {
    pub content: String,
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(content: String) -> Self {
        let mut metadata = Map::new();
        metadata.insert(
            "character_count".to_string(),
            Value::from(content.chars().count()),
        );
        metadata.insert(
            "word_count".to_string(),
            Value::from(content.split_whitespace().count()),
        );
        Self { content, metadata }
    }

    /// Render a batch of table rows into a text document, one line per
    /// row with `column: value` pairs in key order.
    pub fn from_rows(table: &str, rows: &[Map<String, Value>]) -> Self {
        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let line = row
                .iter()
                .map(|(column, value)| match value {
                    Value::String(s) => format!("{column}: {s}"),
                    other => format!("{column}: {other}"),
                })
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(line);
        }
        let mut doc = Self::new(lines.join("\n"));
        doc.metadata
            .insert("table".to_string(), Value::from(table));
        doc.metadata
            .insert("row_count".to_string(), Value::from(rows.len()));
        doc
    }
}

pub trait Reader: Send + Sync {
    fn read(&self, path: &Path) -> Result<Document>;
}

/// Reader for plain-text formats. Content is read as UTF-8; invalid
/// sequences are replaced rather than failing the item.
pub struct PlainTextReader;

impl Reader for PlainTextReader {
    fn read(&self, path: &Path) -> Result<Document> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::read(path.to_string_lossy(), e))?;
        Ok(Document::new(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    }
}

/// Resolve the reader for an item kind, or `None` when no extractor is
/// registered for it.
pub fn reader_for(kind: ItemKind) -> Option<Box<dyn Reader>> {
    match kind {
        ItemKind::Txt | ItemKind::Csv | ItemKind::Json | ItemKind::Other => {
            Some(Box::new(PlainTextReader))
        }
        // Binary formats need a real extractor; none ships by default.
        ItemKind::Pdf | ItemKind::Xlsx => None,
        ItemKind::Table => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_plain_text_reader() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("note.txt");
        std::fs::write(&path, "hello ingestion world").unwrap();

        let doc = PlainTextReader.read(&path).unwrap();
        assert_eq!(doc.content, "hello ingestion world");
        assert_eq!(doc.metadata["word_count"], json!(3));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = PlainTextReader
            .read(Path::new("/no/such/file.txt"))
            .unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }

    #[test]
    fn test_from_rows_renders_columns() {
        let mut row = Map::new();
        row.insert("order_id".to_string(), json!(7));
        row.insert("customer".to_string(), json!("acme"));

        let doc = Document::from_rows("orders", &[row]);
        assert_eq!(doc.content, "customer: acme, order_id: 7");
        assert_eq!(doc.metadata["row_count"], json!(1));
        assert_eq!(doc.metadata["table"], json!("orders"));
    }

    #[test]
    fn test_reader_registry() {
        assert!(reader_for(ItemKind::Txt).is_some());
        assert!(reader_for(ItemKind::Csv).is_some());
        assert!(reader_for(ItemKind::Pdf).is_none());
    }
}
