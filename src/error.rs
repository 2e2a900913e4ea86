//! Application error types for vulnmirror
//!
//! This module defines common error types used throughout the application.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Synchronization-related errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Network timeout
    #[error("Network timeout")]
    Timeout,

    /// Connection refused
    #[error("Connection refused")]
    ConnectionRefused,

    /// Rate limited by the authority (retry-after hint in seconds, if sent)
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Transient server error (5xx)
    #[error("Server error: HTTP {0}")]
    Server(u16),

    /// Non-retryable client error (4xx other than 404/429)
    #[error("Request rejected: HTTP {0}")]
    Rejected(u16),

    /// Unparseable or schema-violating response body
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Generic network error
    #[error("Network error: {0}")]
    Network(String),
}

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection task error
    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    /// Stored value could not be interpreted
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

/// Application-level error type
///
/// Aggregates the domain-specific error types for callers that drive a
/// whole sync invocation.
#[derive(Debug, Error)]
pub enum AppError {
    /// Sync error
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Storage error
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Trait for determining if an error is retryable
pub trait RetryableError {
    /// Returns true if the error is retryable
    fn is_retryable(&self) -> bool;
}

impl RetryableError for SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            SyncError::Timeout => true,
            SyncError::ConnectionRefused => true,
            SyncError::RateLimited(_) => true,
            SyncError::Server(_) => true,
            SyncError::Network(_) => true,

            SyncError::Rejected(_) => false,
            SyncError::Malformed(_) => false,
        }
    }
}
