//! SQLite implementation of the Store trait
//!
//! Uses rusqlite through tokio-rusqlite for async access. The database is
//! opened in WAL mode so reporting collaborators can read while a sync
//! run writes.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::Store;
use crate::error::StoreError;
use crate::models::Record;

/// Last-write-wins upsert: a newer or equal `modified_at` replaces the
/// row, an older one is accepted as a no-op. Timestamps are stored in a
/// fixed-width RFC 3339 form so string comparison is chronological.
const UPSERT_RECORD: &str = r#"
INSERT INTO records (id, source, payload, modified_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(id) DO UPDATE SET
    source = excluded.source,
    payload = excluded.payload,
    modified_at = excluded.modified_at
WHERE excluded.modified_at >= records.modified_at
"#;

const UPSERT_CURSOR: &str = r#"
INSERT INTO sync_cursor (source, last_synced_until)
VALUES (?1, ?2)
ON CONFLICT(source) DO UPDATE SET
    last_synced_until = excluded.last_synced_until
"#;

/// SQLite store implementation
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// Use `:memory:` for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;

        conn.call(|conn| {
            // WAL allows overlapping readers with the single sync writer
            let _mode: String =
                conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory store (useful for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:").await
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn cursor(&self, source: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let source = source.to_string();

        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row(
                        "SELECT last_synced_until FROM sync_cursor WHERE source = ?1",
                        [&source],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;

        raw.map(|s| parse_timestamp(&s)).transpose()
    }

    async fn set_cursor(&self, source: &str, until: DateTime<Utc>) -> Result<(), StoreError> {
        let source = source.to_string();
        let until = format_timestamp(until);

        self.conn
            .call(move |conn| {
                conn.execute(UPSERT_CURSOR, rusqlite::params![source, until])?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn commit_window(
        &self,
        source: &str,
        until: DateTime<Utc>,
        records: Vec<Record>,
    ) -> Result<u64, StoreError> {
        let source = source.to_string();
        let until = format_timestamp(until);

        // Serialize payloads before entering the connection task
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let payload = serde_json::to_string(&record.payload)
                .map_err(|e| StoreError::Corrupt(format!("unserializable payload: {}", e)))?;
            rows.push((record.id, record.source, payload, format_timestamp(record.modified_at)));
        }

        let written = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    // Records before cursor: a crash mid-transaction must
                    // never leave the cursor ahead of the data
                    let mut stmt = tx.prepare_cached(UPSERT_RECORD)?;
                    for (id, record_source, payload, modified_at) in &rows {
                        stmt.execute(rusqlite::params![id, record_source, payload, modified_at])?;
                    }
                }
                tx.execute(UPSERT_CURSOR, rusqlite::params![source, until])?;
                tx.commit()?;
                Ok(rows.len() as u64)
            })
            .await?;

        Ok(written)
    }

    async fn get_record(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let id = id.to_string();

        let row: Option<(String, String, String, String)> = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT id, source, payload, modified_at FROM records WHERE id = ?1",
                        [&id],
                        |row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.map(|(id, source, payload, modified_at)| {
            Ok(Record {
                id,
                source,
                payload: serde_json::from_str(&payload)
                    .map_err(|e| StoreError::Corrupt(format!("stored payload: {}", e)))?,
                modified_at: parse_timestamp(&modified_at)?,
            })
        })
        .transpose()
    }

    async fn record_count(&self) -> Result<u64, StoreError> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;

        Ok(count as u64)
    }

    async fn cache_osv(
        &self,
        ecosystem: &str,
        package: &str,
        version: &str,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        let ecosystem = ecosystem.to_string();
        let package = package.to_string();
        let version = version.to_string();
        let fetched_at = format_timestamp(Utc::now());
        let payload = serde_json::to_string(&payload)
            .map_err(|e| StoreError::Corrupt(format!("unserializable payload: {}", e)))?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO osv_cache (ecosystem, package, version, fetched_at, payload)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(ecosystem, package, version) DO UPDATE SET
                        fetched_at = excluded.fetched_at,
                        payload = excluded.payload
                    "#,
                    rusqlite::params![ecosystem, package, version, fetched_at, payload],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn cached_osv(
        &self,
        ecosystem: &str,
        package: &str,
        version: &str,
        ttl: chrono::Duration,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let ecosystem = ecosystem.to_string();
        let package = package.to_string();
        let version = version.to_string();

        let row: Option<(String, String)> = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT fetched_at, payload FROM osv_cache
                         WHERE ecosystem = ?1 AND package = ?2 AND version = ?3",
                        rusqlite::params![ecosystem, package, version],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        let Some((fetched_at, payload)) = row else {
            return Ok(None);
        };

        let fetched_at = parse_timestamp(&fetched_at)?;
        if fetched_at < Utc::now() - ttl {
            return Ok(None);
        }

        let payload = serde_json::from_str(&payload)
            .map_err(|e| StoreError::Corrupt(format!("stored payload: {}", e)))?;
        Ok(Some(payload))
    }
}

/// Fixed-width RFC 3339 (millisecond precision, Z suffix) so stored
/// timestamps compare chronologically as strings.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {:?}: {}", s, e)))
}
