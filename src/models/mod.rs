//! Domain models for vulnmirror
//!
//! Core value types shared by the sync engine and the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// One vulnerability entry as emitted by the remote authority.
///
/// The full original document is kept verbatim in `payload`; `id` and
/// `modified_at` are extracted for keying and upsert comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable unique identifier, primary key
    pub id: String,
    /// Short tag naming the origin authority
    pub source: String,
    /// Full original structured document, round-tripped verbatim
    pub payload: serde_json::Value,
    /// Authority-supplied last modification timestamp
    pub modified_at: DateTime<Utc>,
}

/// A bounded, half-open time range `[start, end)` used to chunk a sync.
///
/// Ephemeral: produced by the window planner, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        )
    }
}

/// Everything fetched for one window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowFetch {
    /// Records drained from the window, in page order
    pub records: Vec<Record>,
    /// Number of pages fetched
    pub pages: u32,
}

/// Outcome of one sync invocation.
///
/// A populated `failure` with a non-zero `windows_committed` is partial
/// progress: the committed prefix is durable and the next run resumes from
/// the cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Windows produced by the planner for this run
    pub windows_planned: usize,
    /// Windows fetched and durably committed, in order
    pub windows_committed: usize,
    /// Records upserted across committed windows
    pub records_ingested: u64,
    /// Pages fetched across committed windows
    pub pages_fetched: u32,
    /// Error that stopped the run, if any
    pub failure: Option<SyncError>,
}

impl SyncReport {
    /// True when every planned window was committed.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.windows_committed == self.windows_planned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_duration_and_display() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap();
        let window = Window::new(start, end);

        assert_eq!(window.duration(), chrono::Duration::days(7));
        assert_eq!(
            window.to_string(),
            "[2024-01-01T00:00:00Z, 2024-01-08T00:00:00Z)"
        );
    }

    #[test]
    fn test_report_completeness() {
        let complete = SyncReport {
            windows_planned: 3,
            windows_committed: 3,
            records_ingested: 10,
            pages_fetched: 3,
            failure: None,
        };
        assert!(complete.is_complete());

        let partial = SyncReport {
            windows_planned: 3,
            windows_committed: 1,
            records_ingested: 4,
            pages_fetched: 1,
            failure: Some(SyncError::Server(503)),
        };
        assert!(!partial.is_complete());
    }

    #[test]
    fn test_record_payload_round_trip() {
        let payload = serde_json::json!({
            "cve": {"id": "CVE-2024-0001", "lastModified": "2024-01-02T03:04:05.000"},
            "extra": [1, 2, 3]
        });
        let record = Record {
            id: "CVE-2024-0001".to_string(),
            source: "nvd".to_string(),
            payload: payload.clone(),
            modified_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        };

        // The payload is opaque and must survive untouched
        assert_eq!(record.payload, payload);
    }
}
