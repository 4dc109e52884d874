//! CPU saturation via per-core duty cycling
//!
//! One dedicated worker thread per logical processor runs alternating
//! busy-spin and sleep phases inside a fixed window, approximating the target
//! utilization. Worker starts are staggered across the window so aggregate
//! load is smooth instead of pulsing in lockstep. Pool workers are never
//! used; saturating the CPU must not consume pool slots.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::config::CpuStressConfig;
use crate::registry::record::{SimulationKind, SimulationRecord, SimulationResult};
use crate::registry::SimulationRegistry;
use crate::stress::{sleep_cancellable, spin_until, RegistryGuard};

const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// CPU stress request. Duration has no upper bound; the target is clamped
/// to 1-100.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuStressParams {
    pub duration_secs: u64,
    pub target_percent: u32,
}

impl Default for CpuStressParams {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            target_percent: 50,
        }
    }
}

pub struct CpuStressGenerator {
    registry: Arc<SimulationRegistry>,
    config: CpuStressConfig,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
}

impl CpuStressGenerator {
    pub fn new(registry: Arc<SimulationRegistry>, config: CpuStressConfig) -> Self {
        Self {
            registry,
            config,
            supervisors: Mutex::new(Vec::new()),
        }
    }

    /// Start a duty-cycle run and return immediately. The simulation ends on
    /// its deadline or on cancellation, whichever comes first, and removes
    /// itself from the registry either way.
    pub fn start(&self, params: CpuStressParams) -> SimulationResult {
        let duration_secs = params.duration_secs.max(self.config.min_duration_secs);
        let target_percent = params.target_percent.clamp(1, 100);
        let workers = num_cpus::get().max(1);

        let record = SimulationRecord::new(SimulationKind::Cpu)
            .param("duration_secs", duration_secs)
            .param("target_percent", target_percent)
            .param("workers", workers);
        let id = record.id;
        let token = record.cancel.clone();
        let result = SimulationResult::started(
            &record,
            format!(
                "cpu stress at {}% on {} workers for {}s",
                target_percent, workers, duration_secs
            ),
        )
        .with_estimated_end(
            record
                .started_at_ms
                .saturating_add(duration_secs.saturating_mul(1000)),
        );
        self.registry.register(record);

        let registry = Arc::clone(&self.registry);
        let window = Duration::from_millis(self.config.window_ms.max(10));
        let spawned = thread::Builder::new()
            .name("overload-cpu-sup".to_string())
            .spawn(move || {
                let _guard = RegistryGuard::new(registry, id);
                let deadline = Instant::now() + Duration::from_secs(duration_secs);

                let mut handles = Vec::with_capacity(workers);
                for worker in 0..workers {
                    let token = token.clone();
                    let handle = thread::Builder::new()
                        .name(format!("overload-cpu-{}", worker))
                        .spawn(move || {
                            duty_cycle_worker(worker, workers, target_percent, window, deadline, token)
                        });
                    match handle {
                        Ok(handle) => handles.push(handle),
                        Err(e) => warn!("cpu stress worker {} failed to spawn: {}", worker, e),
                    }
                }
                for handle in handles {
                    if handle.join().is_err() {
                        warn!("cpu stress worker panicked");
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                let mut supervisors = self.supervisors.lock();
                supervisors.retain(|h| !h.is_finished());
                supervisors.push(handle);
                info!(
                    "cpu stress {} started: {}% for {}s on {} workers",
                    id, target_percent, duration_secs, workers
                );
                result
            }
            Err(e) => {
                self.registry.unregister(id);
                SimulationResult::rejected(format!("failed to spawn cpu stress supervisor: {}", e))
                    .param("duration_secs", duration_secs)
                    .param("target_percent", target_percent)
            }
        }
    }

    /// Join supervisors whose runs have ended. Blocks until running
    /// simulations finish, so cancel first when tearing down.
    pub fn shutdown(&self) {
        for handle in self.supervisors.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

fn duty_cycle_worker(
    worker: usize,
    total_workers: usize,
    target_percent: u32,
    window: Duration,
    deadline: Instant,
    cancel: CancelToken,
) {
    // Stagger each worker's first window across the cycle
    let offset = window.mul_f64(worker as f64 / total_workers as f64);
    if sleep_cancellable(offset, &cancel, SLEEP_SLICE) {
        return;
    }

    let busy_share = window.mul_f64(f64::from(target_percent) / 100.0);

    while Instant::now() < deadline && !cancel.is_cancelled() {
        let window_start = Instant::now();

        let busy_deadline = (window_start + busy_share).min(deadline);
        if spin_until(busy_deadline, &cancel) {
            return;
        }

        if target_percent >= 100 {
            // full saturation never yields inside the window
            continue;
        }

        let window_end = (window_start + window).min(deadline);
        let now = Instant::now();
        if window_end > now && sleep_cancellable(window_end - now, &cancel, SLEEP_SLICE) {
            return;
        }
    }
}
