//! Sliding-window token accounting for model calls.
//!
//! Pure bookkeeping over an injected clock; the transport owns the actual
//! sleeping. One window per process is enough because a cycle runs strictly
//! sequentially.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Length of the accounting window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Records `(timestamp, tokens)` pairs over a rolling window and answers
/// whether a projected call would exceed the per-minute ceiling.
#[derive(Debug)]
pub struct TokenWindow {
    ceiling: u64,
    entries: VecDeque<(Instant, u64)>,
}

impl TokenWindow {
    pub fn new(ceiling: u64) -> Self {
        Self {
            ceiling,
            entries: VecDeque::new(),
        }
    }

    /// Tokens recorded within the window ending at `now`.
    pub fn used(&mut self, now: Instant) -> u64 {
        self.prune(now);
        self.entries.iter().map(|(_, tokens)| tokens).sum()
    }

    /// How long to wait before a call estimated at `estimate` tokens fits
    /// under the ceiling. `None` means the call may proceed now.
    ///
    /// An estimate that exceeds the ceiling on its own proceeds once the
    /// window is empty; waiting longer would never help.
    pub fn wait_before(&mut self, estimate: u64, now: Instant) -> Option<Duration> {
        self.prune(now);
        if self.entries.is_empty() {
            return None;
        }
        let used: u64 = self.entries.iter().map(|(_, tokens)| tokens).sum();
        if used.saturating_add(estimate) <= self.ceiling {
            return None;
        }
        let (oldest, _) = self.entries.front().copied()?;
        let age_out = oldest + WINDOW;
        Some(age_out.saturating_duration_since(now))
    }

    /// Record actual usage for a completed call.
    pub fn record(&mut self, tokens: u64, now: Instant) {
        self.prune(now);
        self.entries.push_back((now, tokens));
    }

    fn prune(&mut self, now: Instant) {
        while let Some((stamp, _)) = self.entries.front() {
            if now.saturating_duration_since(*stamp) >= WINDOW {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_never_waits() {
        let mut window = TokenWindow::new(1_000);
        let now = Instant::now();
        assert_eq!(window.wait_before(5_000, now), None);
    }

    #[test]
    fn under_ceiling_proceeds() {
        let mut window = TokenWindow::new(1_000);
        let now = Instant::now();
        window.record(400, now);
        assert_eq!(window.wait_before(500, now), None);
        assert_eq!(window.used(now), 400);
    }

    #[test]
    fn over_ceiling_waits_for_oldest_entry() {
        let mut window = TokenWindow::new(1_000);
        let start = Instant::now();
        window.record(600, start);
        let later = start + Duration::from_secs(10);
        window.record(300, later);

        let wait = window
            .wait_before(500, later)
            .expect("projected 1400 > 1000");
        // The 600-token entry ages out 60s after `start`, i.e. 50s from `later`.
        assert_eq!(wait, Duration::from_secs(50));
    }

    #[test]
    fn entries_age_out_of_the_window() {
        let mut window = TokenWindow::new(1_000);
        let start = Instant::now();
        window.record(900, start);
        let after = start + WINDOW;
        assert_eq!(window.used(after), 0);
        assert_eq!(window.wait_before(900, after), None);
    }

    #[test]
    fn projection_counts_all_recorded_usage() {
        // Recorded usage plus the estimate stays at or under the ceiling
        // whenever wait_before returns None and the window is non-empty.
        let mut window = TokenWindow::new(1_000);
        let now = Instant::now();
        window.record(300, now);
        window.record(300, now);
        assert_eq!(window.wait_before(400, now), None);
        let wait = window.wait_before(401, now);
        assert!(wait.is_some());
    }
}
