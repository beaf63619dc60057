//! Relational-table connector (SQLite via sqlx).
//!
//! Each user table is one scannable item. Extraction is incremental: an
//! incremental column is detected per table — declared primary key first,
//! then any column whose declared type mentions timestamp/datetime/date,
//! then an explicit autoincrement column — and batches are pulled with
//!
//! ```sql
//! SELECT * FROM "t" WHERE "col" > ?cursor ORDER BY "col" LIMIT ?batch
//! ```
//!
//! The cursor advances to the maximum incremental value observed in the
//! returned batch and is persisted through [`CursorLedger`]. Tables with
//! no usable incremental column are skipped with a warning — there is no
//! full-rescan fallback, which would re-extract without bound.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DatabaseConnectorConfig;
use crate::error::{Error, Result};
use crate::ledger::{ledger_path, CursorLedger};
use crate::models::{CursorValue, ItemKind, ItemMetadata};
use crate::traits::{Connector, RowBatch, Tabular};

pub struct DatabaseConnector {
    name: String,
    config: DatabaseConnectorConfig,
    pool: SqlitePool,
    ledger: Mutex<CursorLedger>,
}

impl DatabaseConnector {
    pub fn new(
        name: String,
        config: DatabaseConnectorConfig,
        state_dir: &Path,
    ) -> Result<Self> {
        let url = if config.url.starts_with("sqlite:") {
            config.url.clone()
        } else {
            format!("sqlite:{}", config.url)
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| Error::Configuration(format!("invalid database url '{}': {e}", url)))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_lazy_with(options);

        let label = format!("database:{name}");
        let ledger = CursorLedger::open(ledger_path(state_dir, &label));

        Ok(Self {
            name,
            config,
            pool,
            ledger: Mutex::new(ledger),
        })
    }

    async fn user_tables(&self) -> sqlx::Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        if self.config.include_tables.is_empty() {
            return Ok(names);
        }
        Ok(names
            .into_iter()
            .filter(|n| self.config.include_tables.contains(n))
            .collect())
    }

    async fn columns(&self, table: &str) -> sqlx::Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(&format!("PRAGMA table_info(\"{}\")", table))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ColumnInfo {
                    name: row.try_get("name")?,
                    type_name: row.try_get("type")?,
                    pk: row.try_get("pk")?,
                })
            })
            .collect()
    }

    async fn has_autoincrement(&self, table: &str) -> bool {
        // sqlite_sequence only exists once some table declares AUTOINCREMENT.
        sqlx::query_scalar::<_, i64>(
            "SELECT EXISTS(SELECT 1 FROM sqlite_sequence WHERE name = ?)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await
        .map(|n| n != 0)
        .unwrap_or(false)
    }

    async fn incremental_column(&self, table: &str) -> sqlx::Result<Option<String>> {
        let columns = self.columns(table).await?;
        let autoincrement = self.has_autoincrement(table).await;
        Ok(detect_incremental_column(&columns, autoincrement))
    }

    async fn has_rows_past(&self, table: &str, column: &str, cursor: &CursorValue) -> bool {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM \"{}\" WHERE \"{}\" > ?)",
            table, column
        );
        let query = sqlx::query_scalar::<_, i64>(&sql);
        let query = match cursor {
            CursorValue::Int(n) => query.bind(*n),
            CursorValue::Timestamp(ts) => query.bind(ts.to_rfc3339()),
            CursorValue::Text(s) => query.bind(s.clone()),
        };
        query
            .fetch_one(&self.pool)
            .await
            .map(|n| n != 0)
            .unwrap_or(false)
    }

    async fn row_count(&self, table: &str) -> Option<i64> {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM \"{}\"", table))
            .fetch_one(&self.pool)
            .await
            .ok()
    }
}

#[async_trait]
impl Connector for DatabaseConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Incrementally extract rows from relational tables"
    }

    fn connector_type(&self) -> &str {
        "database"
    }

    async fn connect(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(connector = %self.name, "database unreachable: {e}");
                Ok(false)
            }
        }
    }

    async fn scan(&self) -> Result<Vec<ItemMetadata>> {
        if !self.connect().await? {
            warn!(connector = %self.name, "scan aborted, database unavailable");
            return Ok(Vec::new());
        }

        let tables = match self.user_tables().await {
            Ok(tables) => tables,
            Err(e) => {
                warn!(connector = %self.name, "table listing failed: {e}");
                return Ok(Vec::new());
            }
        };

        let source = self.source_label();
        let mut items = Vec::new();

        for table in tables {
            let column = match self.incremental_column(&table).await {
                Ok(Some(column)) => column,
                Ok(None) => {
                    warn!(
                        connector = %self.name,
                        %table,
                        "no primary key, timestamp, or autoincrement column; skipping table"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(connector = %self.name, %table, "column inspection failed: {e}");
                    continue;
                }
            };

            let cursor = self
                .ledger
                .lock()
                .expect("ledger lock")
                .last_key(&table)
                .cloned();

            // Change-signal filter: a table only reappears once rows move
            // past the recorded mark.
            if let Some(ref mark) = cursor {
                if !self.has_rows_past(&table, &column, mark).await {
                    debug!(connector = %self.name, %table, "no rows past cursor");
                    continue;
                }
            }

            let mut extra = Map::new();
            extra.insert("incremental_column".to_string(), column.clone().into());
            if let Some(count) = self.row_count(&table).await {
                extra.insert("row_count".to_string(), count.into());
            }

            items.push(ItemMetadata {
                id: table.clone(),
                name: table.clone(),
                location: self.config.url.clone(),
                size: 0,
                kind: ItemKind::Table,
                last_modified: Utc::now(),
                source: source.clone(),
                checksum: None,
                cursor,
                extra,
            });
        }

        info!(connector = %self.name, found = items.len(), "database scan complete");
        Ok(items)
    }

    fn processed_items(&self) -> BTreeSet<String> {
        self.ledger.lock().expect("ledger lock").table_ids()
    }

    fn mark_processed(&self, item_id: &str, cursor: Option<CursorValue>) -> Result<()> {
        self.ledger.lock().expect("ledger lock").advance(item_id, cursor)
    }

    fn close(&self) -> Result<()> {
        self.ledger.lock().expect("ledger lock").flush()
    }

    fn tabular(&self) -> Option<&dyn Tabular> {
        Some(self)
    }
}

#[async_trait]
impl Tabular for DatabaseConnector {
    async fn fetch_batch(&self, table_id: &str) -> Result<RowBatch> {
        let column = self
            .incremental_column(table_id)
            .await
            .map_err(|e| Error::read(table_id, e))?
            .ok_or_else(|| {
                Error::read(table_id, "no incremental column available")
            })?;

        let cursor = self
            .ledger
            .lock()
            .expect("ledger lock")
            .last_key(table_id)
            .cloned();

        let sql = match cursor {
            Some(_) => format!(
                "SELECT * FROM \"{0}\" WHERE \"{1}\" > ? ORDER BY \"{1}\" LIMIT ?",
                table_id, column
            ),
            None => format!(
                "SELECT * FROM \"{0}\" ORDER BY \"{1}\" LIMIT ?",
                table_id, column
            ),
        };

        let mut query = sqlx::query(&sql);
        if let Some(ref mark) = cursor {
            query = match mark {
                CursorValue::Int(n) => query.bind(*n),
                CursorValue::Timestamp(ts) => query.bind(ts.to_rfc3339()),
                CursorValue::Text(s) => query.bind(s.clone()),
            };
        }
        query = query.bind(self.config.batch_size as i64);

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::read(table_id, e))?;

        let rows: Vec<Map<String, Value>> = rows.iter().map(row_to_json).collect();

        // ORDER BY guarantees the last row holds the maximum.
        let latest_key = rows
            .last()
            .and_then(|row| row.get(&column))
            .map(json_to_cursor);

        debug!(table = table_id, rows = rows.len(), "fetched batch");
        Ok(RowBatch { rows, latest_key })
    }
}

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    /// 1-based position within the primary key, 0 if not part of it.
    pub pk: i64,
}

/// Pick the incremental column for a table, in priority order: primary
/// key, then timestamp-typed columns, then an autoincrement integer.
pub fn detect_incremental_column(
    columns: &[ColumnInfo],
    autoincrement: bool,
) -> Option<String> {
    if let Some(col) = columns.iter().filter(|c| c.pk > 0).min_by_key(|c| c.pk) {
        return Some(col.name.clone());
    }

    if let Some(col) = columns.iter().find(|c| {
        let t = c.type_name.to_ascii_lowercase();
        t.contains("timestamp") || t.contains("datetime") || t.contains("date")
    }) {
        return Some(col.name.clone());
    }

    if autoincrement {
        if let Some(col) = columns
            .iter()
            .find(|c| c.type_name.eq_ignore_ascii_case("integer"))
        {
            return Some(col.name.clone());
        }
    }

    None
}

fn row_to_json(row: &SqliteRow) -> Map<String, Value> {
    let mut map = Map::new();
    for (i, col) in row.columns().iter().enumerate() {
        let value = match row.try_get_raw(i) {
            Ok(raw) if raw.is_null() => Value::Null,
            Ok(raw) => match raw.type_info().name() {
                "INTEGER" => row
                    .try_get::<i64, _>(i)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                "REAL" => row
                    .try_get::<f64, _>(i)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                "BLOB" => row
                    .try_get::<Vec<u8>, _>(i)
                    .map(|b| Value::from(hex::encode(b)))
                    .unwrap_or(Value::Null),
                _ => row
                    .try_get::<String, _>(i)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
            },
            Err(_) => Value::Null,
        };
        map.insert(col.name().to_string(), value);
    }
    map
}

fn json_to_cursor(value: &Value) -> CursorValue {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => CursorValue::Int(i),
            None => CursorValue::Text(n.to_string()),
        },
        Value::String(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(ts) => CursorValue::Timestamp(ts.with_timezone(&Utc)),
            Err(_) => CursorValue::Text(s.clone()),
        },
        other => CursorValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn col(name: &str, type_name: &str, pk: i64) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            type_name: type_name.to_string(),
            pk,
        }
    }

    #[test]
    fn test_detection_prefers_primary_key() {
        let columns = vec![
            col("created_at", "TIMESTAMP", 0),
            col("order_id", "INTEGER", 1),
        ];
        assert_eq!(
            detect_incremental_column(&columns, false),
            Some("order_id".to_string())
        );
    }

    #[test]
    fn test_detection_falls_back_to_timestamp() {
        let columns = vec![col("note", "TEXT", 0), col("created_at", "DATETIME", 0)];
        assert_eq!(
            detect_incremental_column(&columns, false),
            Some("created_at".to_string())
        );
    }

    #[test]
    fn test_detection_none_when_no_candidate() {
        let columns = vec![col("data", "TEXT", 0)];
        assert_eq!(detect_incremental_column(&columns, false), None);
    }

    #[test]
    fn test_composite_pk_uses_first_key_column() {
        let columns = vec![
            col("region", "TEXT", 2),
            col("order_id", "INTEGER", 1),
        ];
        assert_eq!(
            detect_incremental_column(&columns, false),
            Some("order_id".to_string())
        );
    }

    async fn setup(tmp: &TempDir) -> (DatabaseConnector, SqlitePool) {
        let db_path = tmp.path().join("app.db");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .unwrap()
            .create_if_missing(true);
        let seed = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        let connector = DatabaseConnector::new(
            "warehouse".to_string(),
            DatabaseConnectorConfig {
                url: format!("sqlite:{}", db_path.display()),
                batch_size: 1000,
                include_tables: vec![],
            },
            &tmp.path().join("state"),
        )
        .unwrap();

        (connector, seed)
    }

    #[tokio::test]
    async fn test_incremental_extraction_scenario() {
        let tmp = TempDir::new().unwrap();
        let (connector, seed) = setup(&tmp).await;

        sqlx::query("CREATE TABLE orders (order_id INTEGER PRIMARY KEY, customer TEXT)")
            .execute(&seed)
            .await
            .unwrap();
        for i in 1..=5 {
            sqlx::query("INSERT INTO orders (order_id, customer) VALUES (?, ?)")
                .bind(i)
                .bind(format!("customer-{i}"))
                .execute(&seed)
                .await
                .unwrap();
        }

        let items = connector.scan().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "orders");
        assert_eq!(items[0].kind, ItemKind::Table);

        let batch = connector.fetch_batch("orders").await.unwrap();
        assert_eq!(batch.rows.len(), 5);
        assert_eq!(batch.latest_key, Some(CursorValue::Int(5)));

        connector
            .mark_processed("orders", batch.latest_key.clone())
            .unwrap();

        // A non-key update must not reappear: no timestamp column, so
        // only order_id > 5 counts as new.
        sqlx::query("UPDATE orders SET customer = 'renamed' WHERE order_id = 5")
            .execute(&seed)
            .await
            .unwrap();
        assert!(connector.scan().await.unwrap().is_empty());
        assert!(connector.fetch_batch("orders").await.unwrap().rows.is_empty());

        sqlx::query("INSERT INTO orders (order_id, customer) VALUES (6, 'new')")
            .execute(&seed)
            .await
            .unwrap();

        let items = connector.scan().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].cursor, Some(CursorValue::Int(5)));

        let batch = connector.fetch_batch("orders").await.unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rows[0]["order_id"], serde_json::json!(6));
        assert_eq!(batch.latest_key, Some(CursorValue::Int(6)));
    }

    #[tokio::test]
    async fn test_batch_size_limits_fetch() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("app.db");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .unwrap()
            .create_if_missing(true);
        let seed = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        sqlx::query("CREATE TABLE orders (order_id INTEGER PRIMARY KEY)")
            .execute(&seed)
            .await
            .unwrap();
        for i in 1..=5 {
            sqlx::query("INSERT INTO orders (order_id) VALUES (?)")
                .bind(i)
                .execute(&seed)
                .await
                .unwrap();
        }

        let connector = DatabaseConnector::new(
            "warehouse".to_string(),
            DatabaseConnectorConfig {
                url: format!("sqlite:{}", db_path.display()),
                batch_size: 2,
                include_tables: vec![],
            },
            &tmp.path().join("state"),
        )
        .unwrap();

        let batch = connector.fetch_batch("orders").await.unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.latest_key, Some(CursorValue::Int(2)));

        connector.mark_processed("orders", batch.latest_key).unwrap();
        let batch = connector.fetch_batch("orders").await.unwrap();
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.latest_key, Some(CursorValue::Int(4)));
    }

    #[tokio::test]
    async fn test_timestamp_column_without_pk() {
        let tmp = TempDir::new().unwrap();
        let (connector, seed) = setup(&tmp).await;

        sqlx::query("CREATE TABLE events (note TEXT, created_at DATETIME)")
            .execute(&seed)
            .await
            .unwrap();
        sqlx::query("INSERT INTO events VALUES ('a', '2024-01-01T00:00:00Z')")
            .execute(&seed)
            .await
            .unwrap();

        let items = connector.scan().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].extra["incremental_column"],
            serde_json::json!("created_at")
        );
    }

    #[tokio::test]
    async fn test_table_without_incremental_column_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let (connector, seed) = setup(&tmp).await;

        sqlx::query("CREATE TABLE blobs (data TEXT)")
            .execute(&seed)
            .await
            .unwrap();
        sqlx::query("INSERT INTO blobs VALUES ('x')")
            .execute(&seed)
            .await
            .unwrap();

        assert!(connector.scan().await.unwrap().is_empty());
    }
}
