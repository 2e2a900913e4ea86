//! vulnmirror keeps a local SQLite mirror of a remote vulnerability
//! authority in sync by fetching incremental changes.
//!
//! The engine plans bounded time windows over the catch-up range, drains
//! each window through the authority's paginated search endpoint under a
//! fixed-window request budget, and commits records together with the
//! resume cursor in one transaction. Interrupted runs lose nothing: the
//! next run picks up from the last committed window.

pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;
