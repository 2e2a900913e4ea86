//! Fixed-window request budget
//!
//! The authority allows a bounded number of requests per fixed window
//! (50 per 30s with an API key, 5 per 30s without). Every outbound page
//! fetch acquires one token; when the window is exhausted the caller
//! sleeps until the window rolls over.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

struct BudgetState {
    count: u32,
    window_start: Instant,
}

/// Shared token budget over a fixed time window.
///
/// `acquire` never fails; it only delays. Cloning is not needed because
/// the engine holds it behind an `Arc`.
pub struct RequestBudget {
    max_requests: u32,
    window: Duration,
    state: Mutex<BudgetState>,
}

impl RequestBudget {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: Mutex::new(BudgetState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    /// Take one token, sleeping until the current window expires if the
    /// budget is spent.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        let elapsed = state.window_start.elapsed();

        if elapsed >= self.window {
            state.count = 0;
            state.window_start = Instant::now();
        } else if state.count >= self.max_requests {
            let wait = self.window - elapsed;
            debug!(wait_ms = wait.as_millis() as u64, "request budget exhausted, waiting");
            tokio::time::sleep(wait).await;
            state.count = 0;
            state.window_start = Instant::now();
        }

        state.count += 1;
    }
}
