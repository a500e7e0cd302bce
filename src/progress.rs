//! Step progress reporting
//!
//! Converts a `(current, total)` step pair into a percentage and forwards it,
//! with the step's status text, to the front-end.

use crate::frontend::FrontEnd;
use std::sync::Arc;
use tracing::info;

/// Percentage of `current` out of `total`, rounded and clamped to 0..=100.
///
/// A zero total reports 0 rather than dividing by zero.
pub fn progress_percent(current: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = current.saturating_mul(100).saturating_add(total / 2) / total;
    percent.min(100) as u8
}

/// Running step counters for one process.
///
/// `total` only grows; callers must tolerate it increasing mid-run.
pub struct ProgressReporter {
    current: u64,
    total: u64,
    frontend: Arc<dyn FrontEnd>,
}

impl ProgressReporter {
    pub fn new(frontend: Arc<dyn FrontEnd>) -> Self {
        Self {
            current: 0,
            total: 0,
            frontend,
        }
    }

    /// Grow the denominator by `steps`.
    pub fn add_steps(&mut self, steps: u64) {
        self.total = self.total.saturating_add(steps);
    }

    /// Count one more finished step and report it.
    pub fn advance(&mut self, message: &str) -> u8 {
        self.current = self.current.saturating_add(1);
        self.report(message)
    }

    /// Report the current percentage without moving the counters.
    pub fn report(&self, message: &str) -> u8 {
        let percent = self.percent();
        info!("[{}/{}] {}", self.current, self.total, message);
        self.frontend.status(message, Some(percent));
        percent
    }

    #[inline]
    pub fn percent(&self) -> u8 {
        progress_percent(self.current, self.total)
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.current
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::HeadlessFrontEnd;

    #[test]
    fn test_percent_rounds() {
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(23, 23), 100);
    }

    #[test]
    fn test_percent_edges() {
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(5, 0), 0);
        assert_eq!(progress_percent(50, 10), 100);
    }

    #[test]
    fn test_reporter_counts() {
        let mut reporter = ProgressReporter::new(Arc::new(HeadlessFrontEnd));
        reporter.add_steps(4);
        assert_eq!(reporter.advance("one"), 25);
        assert_eq!(reporter.advance("two"), 50);
        reporter.add_steps(4);
        assert_eq!(reporter.percent(), 25);
        assert_eq!(reporter.current(), 2);
        assert_eq!(reporter.total(), 8);
    }
}
