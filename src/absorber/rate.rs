//! Sliding-window ingestion rate governor

use std::time::Duration;

use tokio::time::Instant;

/// Byte accounting for one upload's rate window
///
/// Each window closes once it has lasted longer than the check interval
/// or has absorbed a full interval's worth of bytes at the ceiling rate,
/// whichever comes first. A closing window that ran faster than the
/// ceiling yields the delay needed to bring it back down to the ceiling.
#[derive(Debug, Clone)]
pub struct RateWindow {
    max_rate: u64,
    check_interval: Duration,
    budget: u64,
    window_start: Instant,
    window_bytes: u64,
}

impl RateWindow {
    /// Open the first window at `now`
    ///
    /// # Panics
    ///
    /// Panics if `max_rate` is 0 or `check_interval` is zero
    #[must_use]
    pub fn new(max_rate: u64, check_interval: Duration, now: Instant) -> Self {
        assert!(max_rate > 0, "max_rate must be > 0");
        assert!(!check_interval.is_zero(), "check_interval must be > 0");

        let budget = (max_rate as f64 * check_interval.as_secs_f64()).ceil() as u64;

        Self {
            max_rate,
            check_interval,
            budget: budget.max(1),
            window_start: now,
            window_bytes: 0,
        }
    }

    /// Account `bytes` received at `now`
    ///
    /// Returns the delay to sleep before reading more, if any. When a
    /// delay is returned the next window starts once it has elapsed.
    pub fn record(&mut self, bytes: usize, now: Instant) -> Option<Duration> {
        self.window_bytes += bytes as u64;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed <= self.check_interval && self.window_bytes < self.budget {
            return None;
        }

        let delay = self.throttle_delay(elapsed);
        self.window_bytes = 0;
        self.window_start = now + delay.unwrap_or_default();
        delay
    }

    fn throttle_delay(&self, elapsed: Duration) -> Option<Duration> {
        let window_bytes = self.window_bytes as f64;
        let max_rate = self.max_rate as f64;
        let elapsed = elapsed.as_secs_f64();

        if elapsed > 0.0 && window_bytes / elapsed <= max_rate {
            return None;
        }

        let delay = window_bytes / max_rate - elapsed;
        (delay > 0.0).then(|| Duration::from_secs_f64(delay))
    }

    /// Bytes counted in the open window
    #[must_use]
    pub fn window_bytes(&self) -> u64 {
        self.window_bytes
    }

    /// Bytes a window may hold before it closes early
    #[must_use]
    pub fn budget(&self) -> u64 {
        self.budget
    }
}
