//! Progress observers
//!
//! The engine reports through a [`ProgressObserver`]: a status event after
//! every stored or skipped record, and a log event on lifecycle transitions,
//! completed chunks, and every error or retry. Observers are fire-and-forget;
//! both methods default to no-ops.

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives status and log events from the engine
pub trait ProgressObserver: Send + Sync {
    /// Called after each stored or skipped record
    fn on_status(&self, _count: u64, _total: u64, _current: &str) {}

    /// Called with a human-readable log line
    fn on_log(&self, _message: &str) {}
}

/// Observer that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl ProgressObserver for SilentObserver {}

/// Observer that forwards events to `tracing`
///
/// Status events are logged at debug level, with an info-level progress line
/// every `report_every` records.
#[derive(Debug)]
pub struct TracingObserver {
    report_every: u64,
    last_reported: AtomicU64,
}

impl TracingObserver {
    pub fn new(report_every: u64) -> Self {
        Self {
            report_every: report_every.max(1),
            last_reported: AtomicU64::new(0),
        }
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ProgressObserver for TracingObserver {
    fn on_status(&self, count: u64, total: u64, current: &str) {
        tracing::debug!("[{}/{}] {}", count, total, current);

        let bucket = count / self.report_every;
        if bucket > self.last_reported.swap(bucket, Ordering::Relaxed) {
            tracing::info!(
                "Progress: {}/{} ({:.1}%) latest: {}",
                count,
                total,
                percent(count, total),
                current
            );
        }
    }

    fn on_log(&self, message: &str) {
        tracing::info!("{}", message);
    }
}

/// Completion percentage, tolerating a zero total
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * done as f64 / total as f64
    }
}
