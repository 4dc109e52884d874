//! Immutable point-in-time metrics capture

use serde::Serialize;

/// One sampler reading. Produced on the sampler thread and replaced
/// wholesale; readers either see this snapshot or the next one, never a
/// half-written mix.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Unix millis at capture
    pub timestamp_ms: u64,
    /// Seconds since the observability plane started
    pub uptime_secs: u64,
    /// Process id, for correlating with external tooling
    pub pid: u32,
    /// Process CPU normalised to the whole machine (all cores busy = 100)
    pub process_cpu_percent: f32,
    /// Resident set size in bytes
    pub resident_bytes: u64,
    /// Virtual memory size in bytes
    pub virtual_bytes: u64,
    /// Memory the OS reports as still available, in bytes
    pub available_bytes: u64,
    /// Shared pool worker thread count
    pub pool_workers: usize,
    /// Tasks waiting for a pool worker
    pub pool_queued: u64,
    /// Tasks currently occupying a pool worker
    pub pool_in_flight: u64,
    /// Simulations currently in the registry
    pub active_simulations: usize,
}
