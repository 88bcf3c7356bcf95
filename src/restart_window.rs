//! Sliding-window restart intensity limiter.
//!
//! Uses a monotonic clock (`Instant`) rather than wall-clock time, and
//! applies the window once per supervisor, not per child — see DESIGN.md.

use crate::spec_types::RestartLimit;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Stateful sliding window of recent restart instants.
#[derive(Debug, Default)]
pub struct RestartWindow {
    history: VecDeque<Instant>,
}

impl RestartWindow {
    pub fn new() -> Self {
        Self { history: VecDeque::new() }
    }

    /// Drop entries older than `now - limit.interval`, append `now`, and
    /// compare the resulting length against `limit.max_restarts`.
    ///
    /// `max_restarts = 0` disables restarts entirely.
    pub fn allow_restart(&mut self, now: Instant, limit: RestartLimit) -> bool {
        self.prune(now, limit.interval);
        self.history.push_back(now);
        self.history.len() <= limit.max_restarts as usize
    }

    fn prune(&mut self, now: Instant, interval: Duration) {
        while let Some(&front) = self.history.front() {
            if now.saturating_duration_since(front) > interval {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn recent_count(&self, now: Instant, interval: Duration) -> usize {
        self.history
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) <= interval)
            .count()
    }
}
