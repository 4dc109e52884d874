//! Overload Demo: standalone binary exercising every workload
//!
//! Starts one simulation of each kind, watches the metrics sampler while
//! they run, then releases everything and shuts down. Useful for eyeballing
//! the engine under a process monitor.
//!
//! ## Environment Variables
//!
//! - `OVERLOAD_CONFIG`: Path to a YAML config file (default: built-in defaults)
//! - `OVERLOAD_DEMO_DURATION_SECS`: Observation time in seconds (default: 10)
//! - `OVERLOAD_DEMO_MEMORY_MB`: Size of the retained memory block (default: 64)
//! - `OVERLOAD_DEMO_CPU_PERCENT`: CPU duty-cycle target (default: 30)
//! - `OVERLOAD_DEMO_UNITS`: Work units in the load test batch (default: 16)

use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;

use overload_core::{
    CpuStressParams, EngineConfig, EngineResult, LoadReport, LoadTestParams, MemoryStressParams,
    SimulationId, SimulationKind, SimulationResult, StressEngine, Subscriber, ThreadBlockParams,
};

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Logs lifecycle events and load reports as they arrive on the delivery
/// thread. Snapshots are printed from the main loop instead.
struct ConsoleSubscriber;

impl Subscriber for ConsoleSubscriber {
    fn on_simulation_started(&self, kind: SimulationKind, id: SimulationId) {
        info!("[event] {} {} started", kind, id);
    }

    fn on_simulation_completed(&self, kind: SimulationKind, id: SimulationId) {
        info!("[event] {} {} completed", kind, id);
    }

    fn on_load_report(&self, report: &LoadReport) {
        info!(
            "[event] load report: {} units ({} failed), avg {:.1} ms",
            report.units, report.failed, report.avg_elapsed_ms
        );
    }
}

fn log_start(label: &str, result: &SimulationResult) {
    if result.is_started() {
        info!("{} {}: {}", label, result.id, result.message);
    } else {
        info!("{} rejected: {}", label, result.message);
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("[overload_demo] Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> EngineResult<()> {
    let config = match std::env::var("OVERLOAD_CONFIG") {
        Ok(path) => EngineConfig::from_file(&path)?,
        Err(_) => EngineConfig::default(),
    };
    let duration_secs: u64 = env_or("OVERLOAD_DEMO_DURATION_SECS", 10);
    let memory_mb: u64 = env_or("OVERLOAD_DEMO_MEMORY_MB", 64);
    let cpu_percent: u32 = env_or("OVERLOAD_DEMO_CPU_PERCENT", 30);
    let units: usize = env_or("OVERLOAD_DEMO_UNITS", 16);

    let engine = StressEngine::new(config)?;
    let console = engine.subscribe(Arc::new(ConsoleSubscriber));

    log_start(
        "cpu stress",
        &engine.start_cpu(CpuStressParams {
            duration_secs,
            target_percent: cpu_percent,
        }),
    );
    log_start(
        "memory stress",
        &engine.start_memory(MemoryStressParams { size_mb: memory_mb }),
    );
    log_start(
        "thread block",
        &engine.start_thread_block(ThreadBlockParams {
            delay_ms: duration_secs.saturating_mul(500),
            concurrency: 2,
        }),
    );
    log_start(
        "load test",
        &engine.start_load_test(LoadTestParams {
            units,
            ..LoadTestParams::default()
        }),
    );

    for _ in 0..duration_secs {
        thread::sleep(Duration::from_secs(1));
        if let Some(snapshot) = engine.latest_snapshot() {
            info!(
                "cpu {:.1}% | rss {} MB | avail {} MB | pool {}/{} busy, {} queued | active {}",
                snapshot.process_cpu_percent,
                snapshot.resident_bytes / (1024 * 1024),
                snapshot.available_bytes / (1024 * 1024),
                snapshot.pool_in_flight,
                snapshot.pool_workers,
                snapshot.pool_queued,
                snapshot.active_simulations
            );
        }
    }

    let stats = engine.load_stats();
    info!(
        "load totals: {} completed, {} failed",
        stats.completed_total, stats.failed_total
    );
    if let Some(report) = &stats.last_report {
        info!("last report: {}", serde_json::to_string(report)?);
    }

    engine.unsubscribe(console);
    let released = engine.release_memory();
    info!(
        "released {} blocks ({} MB)",
        released.blocks_released,
        released.bytes_released / (1024 * 1024)
    );
    engine.shutdown();
    info!("[overload_demo] Finished cleanly");
    Ok(())
}
