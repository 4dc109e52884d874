//! Engine configuration: plain serde data bags
//!
//! Every section has working defaults (the reference tuning described in the
//! component docs) and deserializes from partial YAML, so an operator only
//! writes the fields they want to change:
//!
//! ```yaml
//! # overload.yaml
//! pool:
//!   worker_threads: 8
//! load:
//!   soft_limit: 12
//!   failure_probability: 0.1
//! observability:
//!   sample_interval_ms: 500
//! ```
//!
//! Use [`EngineConfig::minimal()`] in tests; it shrinks every interval and
//! floor so scenarios complete in milliseconds instead of minutes.

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// Shared worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker thread count (0 = one per logical CPU)
    pub worker_threads: usize,
    /// Thread name prefix for pool workers
    pub thread_name: String,
    /// Bounded wait for in-flight tasks on shutdown, in ms
    pub shutdown_wait_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            thread_name: "overload-pool".to_string(),
            shutdown_wait_ms: 1000,
        }
    }
}

/// CPU duty-cycle generator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuStressConfig {
    /// Duty-cycle window length in ms
    pub window_ms: u64,
    /// Floor applied to requested durations, in seconds
    pub min_duration_secs: u64,
}

impl Default for CpuStressConfig {
    fn default() -> Self {
        Self {
            window_ms: 200,
            min_duration_secs: 1,
        }
    }
}

/// Memory retention generator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStressConfig {
    /// Floor applied to requested block sizes, in MB
    pub min_block_mb: u64,
    /// Optional ceiling on total retained memory, in MB.
    /// Requests are capped to the remaining headroom; a request with no
    /// headroom left is rejected as a capacity failure.
    pub max_total_mb: Option<u64>,
}

impl Default for MemoryStressConfig {
    fn default() -> Self {
        Self {
            min_block_mb: 10,
            max_total_mb: None,
        }
    }
}

/// Worker-pool starvation generator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadBlockConfig {
    /// Floor applied to requested per-worker delays, in ms
    pub min_delay_ms: u64,
    /// Ceiling applied to requested concurrency
    pub max_concurrency: usize,
}

impl Default for ThreadBlockConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 100,
            max_concurrency: 256,
        }
    }
}

/// Load-work simulator tuning
///
/// The degradation curve is soft: units admitted past `soft_limit` are never
/// rejected, they just pay `degradation_step_ms` per excess concurrent unit
/// on top of `baseline_delay_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadWorkConfig {
    /// Minimum time every unit is held, in ms
    pub baseline_delay_ms: u64,
    /// Concurrency level above which latency starts degrading
    pub soft_limit: u64,
    /// Extra hold time per concurrent unit above the soft limit, in ms
    pub degradation_step_ms: u64,
    /// Sleep slice between burn/touch iterations, in ms
    pub loop_sleep_ms: u64,
    /// Ceiling applied to the caller's per-iteration CPU burn, in ms
    pub max_burn_ms: u64,
    /// Ceiling applied to the caller's retained buffer size, in KB
    pub max_buffer_kb: usize,
    /// Elapsed time after which failure injection arms, in ms
    pub failure_threshold_ms: u64,
    /// Per-check probability of injecting a failure once armed (0.0..=1.0)
    pub failure_probability: f64,
    /// Aggregate report interval, in ms
    pub report_interval_ms: u64,
    /// Ceiling applied to batch unit counts
    pub max_units: usize,
}

impl Default for LoadWorkConfig {
    fn default() -> Self {
        Self {
            baseline_delay_ms: 500,
            soft_limit: 20,
            degradation_step_ms: 100,
            loop_sleep_ms: 10,
            max_burn_ms: 250,
            max_buffer_kb: 262_144,
            failure_threshold_ms: 120_000,
            failure_probability: 0.2,
            report_interval_ms: 60_000,
            max_units: 10_000,
        }
    }
}

impl LoadWorkConfig {
    /// Total hold time for a unit that observed `concurrent_at_start` units
    /// in flight (itself included) when it was admitted.
    pub fn held_duration_ms(&self, concurrent_at_start: u64) -> u64 {
        let excess = concurrent_at_start.saturating_sub(self.soft_limit);
        self.baseline_delay_ms
            .saturating_add(excess.saturating_mul(self.degradation_step_ms))
    }
}

/// Observability plane tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Metrics sampling interval, in ms
    pub sample_interval_ms: u64,
    /// Bounded outbound notification queue capacity
    pub queue_capacity: usize,
    /// Delivery thread sleep when the queue is empty, in ms
    pub drain_idle_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1000,
            queue_capacity: 256,
            drain_idle_ms: 2,
        }
    }
}

/// Top-level engine configuration.
///
/// Use `EngineConfig::default()` for the reference tuning, or start from
/// `EngineConfig::minimal()` and mutate fields directly:
///
/// ```rust,ignore
/// let mut config = EngineConfig::minimal();
/// config.pool.worker_threads = 4;
/// config.load.soft_limit = 8;
/// let engine = StressEngine::new(config)?;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Shared worker pool
    pub pool: PoolConfig,
    /// CPU duty-cycle generator
    pub cpu: CpuStressConfig,
    /// Memory retention generator
    pub memory: MemoryStressConfig,
    /// Worker-pool starvation generator
    pub thread_block: ThreadBlockConfig,
    /// Load-work simulator
    pub load: LoadWorkConfig,
    /// Sampler and notification delivery
    pub observability: ObservabilityConfig,
}

impl EngineConfig {
    /// Minimal configuration with every interval and floor shrunk so tests
    /// and demos run in milliseconds. Failure injection keeps its reference
    /// probability but arms after 500ms instead of two minutes.
    pub fn minimal() -> Self {
        Self {
            pool: PoolConfig {
                worker_threads: 2,
                shutdown_wait_ms: 200,
                ..PoolConfig::default()
            },
            cpu: CpuStressConfig {
                window_ms: 50,
                min_duration_secs: 1,
            },
            memory: MemoryStressConfig {
                min_block_mb: 1,
                max_total_mb: None,
            },
            thread_block: ThreadBlockConfig {
                min_delay_ms: 10,
                max_concurrency: 64,
            },
            load: LoadWorkConfig {
                baseline_delay_ms: 10,
                soft_limit: 2,
                degradation_step_ms: 5,
                loop_sleep_ms: 2,
                max_burn_ms: 20,
                max_buffer_kb: 1024,
                failure_threshold_ms: 500,
                failure_probability: 0.2,
                report_interval_ms: 100,
                max_units: 256,
            },
            observability: ObservabilityConfig {
                sample_interval_ms: 25,
                queue_capacity: 64,
                drain_idle_ms: 1,
            },
        }
    }

    /// Parse a configuration from YAML text. Missing fields keep defaults.
    pub fn from_yaml(yaml: &str) -> EngineResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a configuration from a YAML file.
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> EngineResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}
