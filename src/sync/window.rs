//! Window planning
//!
//! Splits the catch-up range `[since, until)` into contiguous half-open
//! windows no longer than the authority's maximum query span. The final
//! window is truncated to end exactly at `until`.

use chrono::{DateTime, Duration, Utc};

use crate::models::Window;

/// Plan the sequence of fetch windows covering `[since, until)`.
///
/// Returns an empty plan when `until <= since` (the mirror is already
/// current). Windows are contiguous and ordered oldest first.
pub fn plan(since: DateTime<Utc>, until: DateTime<Utc>, max_span: Duration) -> Vec<Window> {
    let mut windows = Vec::new();
    let mut start = since;

    while start < until {
        let end = (start + max_span).min(until);
        windows.push(Window::new(start, end));
        start = end;
    }

    windows
}
