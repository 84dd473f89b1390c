//! # Drain Metrics
//!
//! Running totals across drain passes, kept in memory for diagnostics
//! screens and logs.

use std::time::Duration;

use crate::shared::event::DrainReport;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainMetrics {
    pub total_drains: u64,
    /// Drains that returned early (already running or offline)
    pub skipped_drains: u64,
    pub operations_dispatched: u64,
    pub operations_completed: u64,
    pub operations_retried: u64,
    pub operations_failed: u64,
    pub average_drain_duration: Duration,
    pub last_drain_duration: Option<Duration>,
}

impl DrainMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_drain(&mut self, report: &DrainReport, duration: Duration) {
        self.total_drains = self.total_drains.saturating_add(1);
        self.operations_dispatched += report.dispatched as u64;
        self.operations_completed += report.completed as u64;
        self.operations_retried += report.retried as u64;
        self.operations_failed += report.failed as u64;
        self.last_drain_duration = Some(duration);

        // Rolling average over completed drains, in u128 nanoseconds
        let count = u128::from(self.total_drains);
        let total = self.average_drain_duration.as_nanos() * (count - 1) + duration.as_nanos();
        let average = u64::try_from(total / count).unwrap_or(u64::MAX);
        self.average_drain_duration = Duration::from_nanos(average);
    }

    pub fn record_skip(&mut self) {
        self.skipped_drains += 1;
    }

    /// Fraction of dispatched operations that completed
    pub fn success_rate(&self) -> f64 {
        if self.operations_dispatched == 0 {
            0.0
        } else {
            self.operations_completed as f64 / self.operations_dispatched as f64
        }
    }
}
