//! Metrics sampling loop
//!
//! Runs on its own named OS thread with a blocking sleep between readings,
//! never on the shared pool, so sampling keeps its cadence while the pool is
//! fully starved. One panicking reading is logged and skipped; the loop
//! continues at the next interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::error;
use parking_lot::RwLock;
use sysinfo::{Pid, System};

use crate::config::ObservabilityConfig;
use crate::error::{EngineError, EngineResult};
use crate::observability::broadcast::{Broadcaster, Notification};
use crate::observability::snapshot::MetricsSnapshot;
use crate::pool::SharedPool;
use crate::registry::record::unix_millis;
use crate::registry::SimulationRegistry;

const SHUTDOWN_SLICE: Duration = Duration::from_millis(25);

pub(crate) fn spawn_sampler(
    config: &ObservabilityConfig,
    pool: Arc<SharedPool>,
    registry: Arc<SimulationRegistry>,
    broadcaster: Arc<Broadcaster>,
    latest: Arc<RwLock<Option<MetricsSnapshot>>>,
    running: Arc<AtomicBool>,
) -> EngineResult<JoinHandle<()>> {
    let interval = Duration::from_millis(config.sample_interval_ms.max(10));

    thread::Builder::new()
        .name("overload-sampler".to_string())
        .spawn(move || {
            let mut sys = System::new();
            let pid = Pid::from_u32(std::process::id());
            let cpus = num_cpus::get().max(1) as f32;
            let started = Instant::now();

            while running.load(Ordering::Relaxed) {
                let sampled = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    sample_once(&mut sys, pid, cpus, started, &pool, &registry)
                }));
                match sampled {
                    Ok(snapshot) => {
                        *latest.write() = Some(snapshot.clone());
                        broadcaster.publish(Notification::Snapshot(snapshot));
                    }
                    Err(panic) => {
                        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            (*s).to_string()
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "unknown panic".to_string()
                        };
                        error!("metrics sample panicked, skipping interval: {}", msg);
                    }
                }

                // Sliced sleep so long intervals still shut down promptly
                let mut slept = Duration::ZERO;
                while slept < interval && running.load(Ordering::Relaxed) {
                    let slice = SHUTDOWN_SLICE.min(interval - slept);
                    thread::sleep(slice);
                    slept += slice;
                }
            }
        })
        .map_err(|e| EngineError::spawn(format!("sampler thread: {}", e)))
}

fn sample_once(
    sys: &mut System,
    pid: Pid,
    cpus: f32,
    started: Instant,
    pool: &SharedPool,
    registry: &SimulationRegistry,
) -> MetricsSnapshot {
    sys.refresh_memory();
    sys.refresh_process(pid);

    // sysinfo reports process CPU as a per-core percentage; normalise so the
    // whole machine is 100. The first reading after startup is 0 until a
    // second refresh establishes the delta.
    let (cpu, resident, virt) = match sys.process(pid) {
        Some(process) => (
            (process.cpu_usage() / cpus).min(100.0),
            process.memory(),
            process.virtual_memory(),
        ),
        None => (0.0, 0, 0),
    };

    MetricsSnapshot {
        timestamp_ms: unix_millis(),
        uptime_secs: started.elapsed().as_secs(),
        pid: pid.as_u32(),
        process_cpu_percent: cpu,
        resident_bytes: resident,
        virtual_bytes: virt,
        available_bytes: sys.available_memory(),
        pool_workers: pool.workers(),
        pool_queued: pool.queued(),
        pool_in_flight: pool.in_flight(),
        active_simulations: registry.count_active(),
    }
}
