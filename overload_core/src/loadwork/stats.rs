//! Window counters and reports for the load simulator
//!
//! Units record into lock-free atomics; the reporter thread drains the
//! window on its interval and turns the counts into a [`LoadReport`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::registry::record::unix_millis;

/// Raise `cell` to `value` if it is larger, retrying on races. No store
/// happens when the held value is already bigger.
fn store_max(cell: &AtomicU64, value: u64) {
    let mut current = cell.load(Ordering::Relaxed);
    while value > current {
        match cell.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(observed) => current = observed,
        }
    }
}

/// Counters for the current reporting window.
#[derive(Debug, Default)]
pub struct WindowStats {
    units: AtomicU64,
    failed: AtomicU64,
    total_elapsed_ms: AtomicU64,
    max_elapsed_ms: AtomicU64,
    peak_concurrency: AtomicU64,
}

/// One drained window, counters zeroed behind it.
#[derive(Debug, Clone, Copy)]
pub struct WindowDrain {
    pub units: u64,
    pub failed: u64,
    pub total_elapsed_ms: u64,
    pub max_elapsed_ms: u64,
    pub peak_concurrency: u64,
}

impl WindowStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one finished unit into the window.
    pub fn record_unit(&self, elapsed_ms: u64, failed: bool) {
        self.units.fetch_add(1, Ordering::Relaxed);
        self.total_elapsed_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        store_max(&self.max_elapsed_ms, elapsed_ms);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Track the concurrency level a unit saw when it started.
    pub fn observe_concurrency(&self, level: u64) {
        store_max(&self.peak_concurrency, level);
    }

    pub fn units(&self) -> u64 {
        self.units.load(Ordering::Relaxed)
    }

    pub fn peak_concurrency(&self) -> u64 {
        self.peak_concurrency.load(Ordering::Relaxed)
    }

    /// Take the window and reset it. Units finishing concurrently land in
    /// the next window, never lost.
    pub fn drain(&self) -> WindowDrain {
        WindowDrain {
            units: self.units.swap(0, Ordering::Relaxed),
            failed: self.failed.swap(0, Ordering::Relaxed),
            total_elapsed_ms: self.total_elapsed_ms.swap(0, Ordering::Relaxed),
            max_elapsed_ms: self.max_elapsed_ms.swap(0, Ordering::Relaxed),
            peak_concurrency: self.peak_concurrency.swap(0, Ordering::Relaxed),
        }
    }
}

/// How a work unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Per-unit measurement published to subscribers as the unit retires.
#[derive(Debug, Clone, Serialize)]
pub struct WorkUnitSample {
    pub elapsed_ms: u64,
    pub concurrent_at_start: u64,
    pub held_target_ms: u64,
    pub outcome: WorkOutcome,
}

/// Aggregate for one reporting window.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub timestamp_ms: u64,
    /// Measured window length; can exceed the configured interval when the
    /// reporter thread is itself starved.
    pub window_ms: u64,
    pub units: u64,
    pub failed: u64,
    pub avg_elapsed_ms: f64,
    pub max_elapsed_ms: u64,
    pub peak_concurrency: u64,
    pub throughput_per_sec: f64,
}

impl LoadReport {
    pub(crate) fn from_window(drain: &WindowDrain, window_ms: u64) -> Self {
        let avg_elapsed_ms = if drain.units > 0 {
            drain.total_elapsed_ms as f64 / drain.units as f64
        } else {
            0.0
        };
        let throughput_per_sec = if window_ms > 0 {
            drain.units as f64 * 1000.0 / window_ms as f64
        } else {
            0.0
        };
        Self {
            timestamp_ms: unix_millis(),
            window_ms,
            units: drain.units,
            failed: drain.failed,
            avg_elapsed_ms,
            max_elapsed_ms: drain.max_elapsed_ms,
            peak_concurrency: drain.peak_concurrency,
            throughput_per_sec,
        }
    }
}

/// Point-in-time view of the simulator, cheap to take at any moment.
#[derive(Debug, Clone, Serialize)]
pub struct LoadTestStats {
    pub in_flight: u64,
    pub completed_total: u64,
    pub failed_total: u64,
    pub window_units: u64,
    pub window_peak_concurrency: u64,
    pub last_report: Option<LoadReport>,
}
