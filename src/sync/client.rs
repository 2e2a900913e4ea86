//! HTTP client for the remote vulnerability authority
//!
//! Drains one window at a time through the paginated search endpoint,
//! spending one budget token per page and retrying transient failures
//! per the backoff schedule.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::error::SyncError;
use crate::models::{Record, Window, WindowFetch};
use crate::sync::budget::RequestBudget;
use crate::sync::retry::RetryPolicy;

/// Fetches all records modified within a window.
///
/// The trait seam lets the orchestrator be tested against a mock
/// without a live endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WindowFetcher: Send + Sync {
    async fn fetch_window(&self, window: Window) -> Result<WindowFetch, SyncError>;
}

/// One page of the authority's search response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedPage {
    total_results: u64,
    results_per_page: u64,
    #[serde(default)]
    vulnerabilities: Vec<serde_json::Value>,
}

/// Client for the authority's paginated search endpoint
pub struct FeedClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    source: String,
    page_size: u32,
    budget: Arc<RequestBudget>,
    retry: RetryPolicy,
}

impl FeedClient {
    pub fn new(config: &SourceConfig) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;

        let budget = Arc::new(RequestBudget::new(
            config.resolved_max_requests(),
            Duration::from_secs(config.window_secs),
        ));

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            source: config.name.clone(),
            page_size: config.page_size,
            budget,
            retry: RetryPolicy::default(),
        })
    }

    #[cfg(test)]
    fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One raw page request. Maps the status taxonomy; never retries.
    async fn fetch_page(&self, window: Window, start_index: u64) -> Result<FeedPage, SyncError> {
        let mut request = self
            .http
            .get(&self.base_url)
            .query(&[
                (
                    "lastModStartDate",
                    window.start.to_rfc3339_opts(SecondsFormat::Millis, true),
                ),
                (
                    "lastModEndDate",
                    window.end.to_rfc3339_opts(SecondsFormat::Millis, true),
                ),
                ("resultsPerPage", self.page_size.to_string()),
                ("startIndex", start_index.to_string()),
            ]);

        if let Some(key) = &self.api_key {
            request = request.header("apiKey", key);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();

        match status {
            StatusCode::OK => {
                let body = response.text().await.map_err(map_transport_error)?;
                serde_json::from_str(&body).map_err(|e| SyncError::Malformed(e.to_string()))
            }
            // The authority answers 404 for windows with no matches
            StatusCode::NOT_FOUND => Ok(FeedPage {
                total_results: 0,
                results_per_page: 0,
                vulnerabilities: Vec::new(),
            }),
            StatusCode::TOO_MANY_REQUESTS => {
                let hint = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(0);
                Err(SyncError::RateLimited(hint))
            }
            s if s.is_server_error() => Err(SyncError::Server(s.as_u16())),
            s => Err(SyncError::Rejected(s.as_u16())),
        }
    }

    /// Pull `id` and `modified_at` out of one feed item, keeping the
    /// item itself verbatim as the payload. Items missing either field
    /// are skipped with a warning rather than failing the window.
    fn extract_record(&self, item: serde_json::Value) -> Option<Record> {
        let id = item
            .get("cve")
            .and_then(|cve| cve.get("id"))
            .and_then(|id| id.as_str())
            .map(str::to_string);

        let Some(id) = id else {
            warn!("feed item missing id, skipping");
            return None;
        };

        let modified = item
            .get("cve")
            .and_then(|cve| cve.get("lastModified"))
            .or_else(|| item.get("lastModified"))
            .and_then(|m| m.as_str())
            .and_then(parse_modified);

        let Some(modified_at) = modified else {
            warn!(id = %id, "feed item missing or unparseable lastModified, skipping");
            return None;
        };

        Some(Record {
            id,
            source: self.source.clone(),
            payload: item,
            modified_at,
        })
    }
}

#[async_trait]
impl WindowFetcher for FeedClient {
    async fn fetch_window(&self, window: Window) -> Result<WindowFetch, SyncError> {
        let mut fetch = WindowFetch::default();
        let mut offset: u64 = 0;
        let mut total: Option<u64> = None;

        loop {
            // One token per page; retries of the same page do not pay again
            self.budget.acquire().await;
            let page = self
                .retry
                .execute(|| self.fetch_page(window, offset))
                .await?;
            fetch.pages += 1;

            match total {
                None => total = Some(page.total_results),
                Some(expected) if page.total_results != expected => {
                    // The first page's count stays authoritative
                    warn!(
                        window = %window,
                        expected,
                        reported = page.total_results,
                        "totalResults changed mid-window"
                    );
                }
                Some(_) => {}
            }

            let item_count = page.vulnerabilities.len() as u64;
            fetch.records.extend(
                page.vulnerabilities
                    .into_iter()
                    .filter_map(|item| self.extract_record(item)),
            );

            if item_count == 0 {
                break;
            }

            let advance = page.results_per_page.max(item_count);
            offset += advance;
            if offset >= total.unwrap_or(0) {
                break;
            }
        }

        debug!(
            window = %window,
            pages = fetch.pages,
            records = fetch.records.len(),
            "window drained"
        );
        Ok(fetch)
    }
}

fn map_transport_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else if err.is_connect() {
        SyncError::ConnectionRefused
    } else {
        SyncError::Network(err.to_string())
    }
}

/// The authority emits ISO-8601 timestamps without a zone designator;
/// accept both that form and full RFC 3339.
fn parse_modified(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{header, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer, page_size: u32) -> SourceConfig {
        SourceConfig {
            base_url: server.uri(),
            page_size,
            // Generous budget so tests never wait on the rate window
            max_requests_per_window: Some(1000),
            ..Default::default()
        }
    }

    fn window() -> Window {
        Window::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap(),
        )
    }

    fn item(id: &str, modified: &str) -> serde_json::Value {
        serde_json::json!({ "cve": { "id": id, "lastModified": modified } })
    }

    fn page(total: u64, per_page: u64, items: Vec<serde_json::Value>) -> serde_json::Value {
        serde_json::json!({
            "totalResults": total,
            "resultsPerPage": per_page,
            "vulnerabilities": items,
        })
    }

    // Test 1: Single page windows fetch in one request
    #[tokio::test]
    async fn test_fetch_single_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(query_param("startIndex", "0"))
            .and(query_param("lastModStartDate", "2024-01-01T00:00:00.000Z"))
            .and(query_param("lastModEndDate", "2024-01-08T00:00:00.000Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                2,
                2,
                vec![
                    item("CVE-2024-0001", "2024-01-02T10:00:00.000"),
                    item("CVE-2024-0002", "2024-01-03T10:00:00.000"),
                ],
            )))
            .expect(1)
            .mount(&server)
            .await;

        let client = FeedClient::new(&test_config(&server, 2000)).unwrap();
        let fetch = client.fetch_window(window()).await.unwrap();

        assert_eq!(fetch.pages, 1);
        assert_eq!(fetch.records.len(), 2);
        assert_eq!(fetch.records[0].id, "CVE-2024-0001");
        assert_eq!(
            fetch.records[0].modified_at,
            Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap()
        );
        assert_eq!(fetch.records[0].source, "nvd");
    }

    // Test 2: Pagination walks startIndex until the total is reached
    #[tokio::test]
    async fn test_fetch_paginated_window() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(query_param("startIndex", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                5,
                2,
                vec![
                    item("CVE-2024-0001", "2024-01-02T00:00:00.000"),
                    item("CVE-2024-0002", "2024-01-02T00:00:00.000"),
                ],
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("startIndex", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                5,
                2,
                vec![
                    item("CVE-2024-0003", "2024-01-03T00:00:00.000"),
                    item("CVE-2024-0004", "2024-01-03T00:00:00.000"),
                ],
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("startIndex", "4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                5,
                1,
                vec![item("CVE-2024-0005", "2024-01-04T00:00:00.000")],
            )))
            .expect(1)
            .mount(&server)
            .await;

        let client = FeedClient::new(&test_config(&server, 2)).unwrap();
        let fetch = client.fetch_window(window()).await.unwrap();

        assert_eq!(fetch.pages, 3);
        assert_eq!(fetch.records.len(), 5);
        let ids: Vec<_> = fetch.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "CVE-2024-0001",
                "CVE-2024-0002",
                "CVE-2024-0003",
                "CVE-2024-0004",
                "CVE-2024-0005"
            ]
        );
    }

    // Test 3: 404 means an empty window, not a failure
    #[tokio::test]
    async fn test_empty_window_via_404() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = FeedClient::new(&test_config(&server, 2000)).unwrap();
        let fetch = client.fetch_window(window()).await.unwrap();

        assert_eq!(fetch.records.len(), 0);
        assert_eq!(fetch.pages, 1);
    }

    // Test 4: 429 is retried and the Retry-After hint honored
    #[tokio::test]
    async fn test_rate_limited_then_success() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("Retry-After", "1"),
            )
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                1,
                1,
                vec![item("CVE-2024-0001", "2024-01-02T00:00:00.000")],
            )))
            .expect(1)
            .mount(&server)
            .await;

        let client = FeedClient::new(&test_config(&server, 2000)).unwrap();
        let fetch = client.fetch_window(window()).await.unwrap();

        assert_eq!(fetch.records.len(), 1);
    }

    // Test 4b: A retried page costs one budget token, not one per attempt
    #[tokio::test]
    async fn test_retry_does_not_spend_extra_budget() {
        let server = MockServer::start().await;

        // Three HTTP requests in total (429 + two pages) against a budget
        // of exactly two tokens; if retries paid for tokens the third
        // request would stall a full rate window
        Mock::given(method("GET"))
            .and(query_param("startIndex", "0"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("startIndex", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                2,
                1,
                vec![item("CVE-2024-0001", "2024-01-02T00:00:00.000")],
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("startIndex", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                2,
                1,
                vec![item("CVE-2024-0002", "2024-01-02T00:00:00.000")],
            )))
            .expect(1)
            .mount(&server)
            .await;

        let config = SourceConfig {
            max_requests_per_window: Some(2),
            ..test_config(&server, 1)
        };
        let client = FeedClient::new(&config).unwrap();

        let started = std::time::Instant::now();
        let fetch = client.fetch_window(window()).await.unwrap();

        assert_eq!(fetch.pages, 2);
        assert_eq!(fetch.records.len(), 2);
        // Only the Retry-After second elapses, never a budget-window wait
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    // Test 5: Other 4xx responses fail immediately without retries
    #[tokio::test]
    async fn test_rejected_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let client = FeedClient::new(&test_config(&server, 2000)).unwrap();
        let result = client.fetch_window(window()).await;

        assert_eq!(result, Err(SyncError::Rejected(403)));
    }

    // Test 6: An unparseable 200 body aborts the window as malformed
    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"truncated\": "))
            .expect(1)
            .mount(&server)
            .await;

        let client = FeedClient::new(&test_config(&server, 2000)).unwrap();
        let result = client.fetch_window(window()).await;

        assert!(matches!(result, Err(SyncError::Malformed(_))));
    }

    // Test 7: Persistent 5xx exhausts the retry budget
    #[tokio::test]
    async fn test_server_error_exhausts_retries() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = FeedClient::new(&test_config(&server, 2000))
            .unwrap()
            .with_retry_policy(RetryPolicy::with_max_retries(0));
        let result = client.fetch_window(window()).await;

        assert_eq!(result, Err(SyncError::Server(503)));
    }

    // Test 8: The API key rides in the apiKey header
    #[tokio::test]
    async fn test_api_key_header() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(header("apiKey", "secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(0, 0, vec![])))
            .expect(1)
            .mount(&server)
            .await;

        let config = SourceConfig {
            api_key: Some("secret-key".to_string()),
            ..test_config(&server, 2000)
        };
        let client = FeedClient::new(&config).unwrap();
        let fetch = client.fetch_window(window()).await.unwrap();

        assert_eq!(fetch.records.len(), 0);
    }

    // Test 9: Items missing id or lastModified are skipped, not fatal
    #[tokio::test]
    async fn test_skips_incomplete_items() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                3,
                3,
                vec![
                    item("CVE-2024-0001", "2024-01-02T00:00:00.000"),
                    serde_json::json!({ "cve": { "id": "CVE-2024-0002" } }),
                    serde_json::json!({ "cve": { "lastModified": "2024-01-02T00:00:00.000" } }),
                ],
            )))
            .mount(&server)
            .await;

        let client = FeedClient::new(&test_config(&server, 2000)).unwrap();
        let fetch = client.fetch_window(window()).await.unwrap();

        assert_eq!(fetch.records.len(), 1);
        assert_eq!(fetch.records[0].id, "CVE-2024-0001");
    }

    // Test 10: Both timestamp shapes parse to the same instant
    #[test]
    fn test_parse_modified_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();

        assert_eq!(parse_modified("2024-01-02T03:04:05.000"), Some(expected));
        assert_eq!(parse_modified("2024-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_modified("2024-01-02T03:04:05+00:00"), Some(expected));
        assert_eq!(parse_modified("yesterday"), None);
    }
}
