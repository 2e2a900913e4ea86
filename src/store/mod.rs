//! Persistence layer for vulnmirror
//!
//! This module defines the store trait and its SQLite implementation.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::Record;

/// Durable persistence of mirrored records and resume cursors.
///
/// `commit_window` is the single write path of the sync engine; the read
/// operations exist for the reporting collaborators and for tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Resume cursor for a sync stream, absent before the first sync
    async fn cursor(&self, source: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Explicit operator override of the cursor; the engine itself only
    /// advances cursors through `commit_window`
    async fn set_cursor(&self, source: &str, until: DateTime<Utc>) -> Result<(), StoreError>;

    /// Atomically upsert a window's records, then advance the cursor to
    /// `until`. Either both effects land or neither does.
    ///
    /// Returns the number of records written.
    async fn commit_window(
        &self,
        source: &str,
        until: DateTime<Utc>,
        records: Vec<Record>,
    ) -> Result<u64, StoreError>;

    /// Fetch one mirrored record by id
    async fn get_record(&self, id: &str) -> Result<Option<Record>, StoreError>;

    /// Total number of mirrored records
    async fn record_count(&self) -> Result<u64, StoreError>;

    /// Cache a package-vulnerability lookup result
    async fn cache_osv(
        &self,
        ecosystem: &str,
        package: &str,
        version: &str,
        payload: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Read a cached package-vulnerability lookup; entries older than
    /// `ttl` are treated as absent
    async fn cached_osv(
        &self,
        ecosystem: &str,
        package: &str,
        version: &str,
        ttl: chrono::Duration,
    ) -> Result<Option<serde_json::Value>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // Mock-based tests proving the trait seam is usable from the engine side.

    #[tokio::test]
    async fn test_mock_store_cursor_absent_then_present() {
        let mut mock = MockStore::new();

        let until = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
        mock.expect_cursor()
            .withf(|source| source == "nvd")
            .times(1)
            .returning(|_| Ok(None));
        mock.expect_cursor()
            .withf(|source| source == "nvd")
            .returning(move |_| Ok(Some(until)));

        assert_eq!(mock.cursor("nvd").await.unwrap(), None);
        assert_eq!(mock.cursor("nvd").await.unwrap(), Some(until));
    }

    #[tokio::test]
    async fn test_mock_store_commit_window() {
        let mut mock = MockStore::new();

        mock.expect_commit_window()
            .withf(|source, _, records| source == "nvd" && records.len() == 2)
            .returning(|_, _, records| Ok(records.len() as u64));

        let until = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
        let records = vec![
            Record {
                id: "CVE-2024-0001".to_string(),
                source: "nvd".to_string(),
                payload: serde_json::json!({}),
                modified_at: until,
            },
            Record {
                id: "CVE-2024-0002".to_string(),
                source: "nvd".to_string(),
                payload: serde_json::json!({}),
                modified_at: until,
            },
        ];

        let written = mock.commit_window("nvd", until, records).await.unwrap();
        assert_eq!(written, 2);
    }

    #[tokio::test]
    async fn test_mock_store_error_propagates() {
        let mut mock = MockStore::new();

        mock.expect_commit_window()
            .returning(|_, _, _| Err(StoreError::Corrupt("disk full".to_string())));

        let until = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
        let result = mock.commit_window("nvd", until, vec![]).await;
        assert!(result.is_err());
    }
}
