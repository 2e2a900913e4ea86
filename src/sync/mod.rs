//! Delta synchronization engine
//!
//! Pulls incremental changes from the remote vulnerability authority and
//! commits them window by window through the store.

pub mod budget;
pub mod client;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod window;

pub use budget::RequestBudget;
pub use client::{FeedClient, WindowFetcher};
pub use orchestrator::Orchestrator;
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, Syncable};
