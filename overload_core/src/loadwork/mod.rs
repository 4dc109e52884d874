//! Degrading request simulator
//!
//! Each work unit holds a buffer and a concurrency slot for a duration that
//! grows with the concurrency it found on arrival, burning CPU in slices
//! while it waits. Units alive past the failure threshold roll against a
//! weighted error pool, so saturated runs start failing the way an
//! overloaded service does.

pub mod failure;
pub mod stats;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::config::LoadWorkConfig;
use crate::error::{EngineError, EngineResult};
use crate::observability::broadcast::{Broadcaster, Notification};
use crate::pool::SharedPool;
use crate::registry::record::{SimulationKind, SimulationRecord, SimulationResult};
use crate::registry::SimulationRegistry;
use crate::stress::{spin_until, RegistryGuard};

pub use failure::{FailureContext, FailurePool, SimulatedFailure, WorkUnitError};
pub use stats::{LoadReport, LoadTestStats, WindowStats, WorkOutcome, WorkUnitSample};

const PAGE_STRIDE: usize = 4096;
const REPORT_SLICE: Duration = Duration::from_millis(25);
const COORDINATOR_POLL: Duration = Duration::from_millis(100);

/// Shape of one work unit. Oversized requests are clamped, never refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkUnitParams {
    /// Buffer retained for the full hold, in KB
    pub buffer_kb: usize,
    /// CPU burned per loop iteration, in ms
    pub burn_ms: u64,
}

impl Default for WorkUnitParams {
    fn default() -> Self {
        Self {
            buffer_kb: 64,
            burn_ms: 2,
        }
    }
}

/// A batch of identical units dispatched onto the shared pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadTestParams {
    pub units: usize,
    pub unit: WorkUnitParams,
}

impl Default for LoadTestParams {
    fn default() -> Self {
        Self {
            units: 16,
            unit: WorkUnitParams::default(),
        }
    }
}

/// What a successfully finished unit measured about itself.
#[derive(Debug, Clone, Serialize)]
pub struct WorkUnitReport {
    pub elapsed_ms: u64,
    pub held_target_ms: u64,
    pub concurrent_at_start: u64,
    pub iterations: u64,
}

pub struct LoadWorkSimulator {
    registry: Arc<SimulationRegistry>,
    pool: Arc<SharedPool>,
    broadcaster: Arc<Broadcaster>,
    config: LoadWorkConfig,
    failure_pool: FailurePool,
    in_flight: AtomicU64,
    completed_total: AtomicU64,
    failed_total: AtomicU64,
    window: Arc<WindowStats>,
    last_report: Arc<RwLock<Option<LoadReport>>>,
    reporter_running: Arc<AtomicBool>,
    reporter_handle: Mutex<Option<JoinHandle<()>>>,
    coordinators: Mutex<Vec<JoinHandle<()>>>,
}

impl LoadWorkSimulator {
    pub fn new(
        registry: Arc<SimulationRegistry>,
        pool: Arc<SharedPool>,
        broadcaster: Arc<Broadcaster>,
        config: LoadWorkConfig,
    ) -> EngineResult<Self> {
        let window = Arc::new(WindowStats::new());
        let last_report = Arc::new(RwLock::new(None));
        let reporter_running = Arc::new(AtomicBool::new(true));
        let reporter = spawn_reporter(
            &config,
            Arc::clone(&window),
            Arc::clone(&last_report),
            Arc::clone(&broadcaster),
            Arc::clone(&reporter_running),
        )?;

        Ok(Self {
            registry,
            pool,
            broadcaster,
            config,
            failure_pool: FailurePool::standard(),
            in_flight: AtomicU64::new(0),
            completed_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            window,
            last_report,
            reporter_running,
            reporter_handle: Mutex::new(Some(reporter)),
            coordinators: Mutex::new(Vec::new()),
        })
    }

    /// Run one work unit to completion on the calling thread.
    ///
    /// The concurrency slot, window accounting, and sample publication are
    /// all handled by a drop guard, so they happen on every exit path,
    /// injected failures and panics included.
    pub fn run_unit(
        &self,
        params: WorkUnitParams,
        cancel: &CancelToken,
    ) -> Result<WorkUnitReport, WorkUnitError> {
        let started = Instant::now();
        let concurrent_at_start = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.window.observe_concurrency(concurrent_at_start);
        let held_target_ms = self.config.held_duration_ms(concurrent_at_start);

        // From here on the guard owns the slot
        let mut guard = UnitGuard {
            sim: self,
            started,
            concurrent_at_start,
            held_target_ms,
            outcome: WorkOutcome::Failed,
        };

        if cancel.is_cancelled() {
            guard.outcome = WorkOutcome::Cancelled;
            return Err(WorkUnitError::Cancelled);
        }

        let buffer_kb = params.buffer_kb.clamp(1, self.config.max_buffer_kb);
        let burn_ms = params.burn_ms.min(self.config.max_burn_ms);
        let buffer_len = buffer_kb * 1024;
        let mut buffer: Vec<u8> = Vec::new();
        if let Err(e) = buffer.try_reserve_exact(buffer_len) {
            return Err(WorkUnitError::Allocation(e.to_string()));
        }
        buffer.resize(buffer_len, 0);

        let held_target = Duration::from_millis(held_target_ms);
        let hold_deadline = started + held_target;
        let burn_slice = Duration::from_millis(burn_ms);
        let sleep_slice = Duration::from_millis(self.config.loop_sleep_ms.max(1));
        let mut rng = rand::thread_rng();
        let mut iterations = 0u64;

        while started.elapsed() < held_target {
            if cancel.is_cancelled() {
                guard.outcome = WorkOutcome::Cancelled;
                return Err(WorkUnitError::Cancelled);
            }

            let burn_deadline = (Instant::now() + burn_slice).min(hold_deadline);
            if spin_until(burn_deadline, cancel) {
                guard.outcome = WorkOutcome::Cancelled;
                return Err(WorkUnitError::Cancelled);
            }
            touch_pages(&mut buffer, iterations);

            if let Some(injected) =
                self.maybe_fail(&mut rng, started.elapsed(), concurrent_at_start)
            {
                return Err(injected.into());
            }

            let remaining = held_target.saturating_sub(started.elapsed());
            thread::sleep(sleep_slice.min(remaining));
            iterations += 1;
        }

        // One last roll covers units whose hold expired between checks
        if let Some(injected) = self.maybe_fail(&mut rng, started.elapsed(), concurrent_at_start) {
            return Err(injected.into());
        }

        guard.outcome = WorkOutcome::Completed;
        Ok(WorkUnitReport {
            elapsed_ms: started.elapsed().as_millis() as u64,
            held_target_ms,
            concurrent_at_start,
            iterations,
        })
    }

    /// Dispatch a batch of units onto the shared pool and register one
    /// record for the batch. The record retires when every unit has come
    /// back or the batch is cancelled.
    pub fn start(self: &Arc<Self>, params: LoadTestParams) -> SimulationResult {
        let units = params.units.clamp(1, self.config.max_units);
        let unit_params = params.unit;

        let record = SimulationRecord::new(SimulationKind::LoadTest)
            .param("units", units)
            .param("buffer_kb", unit_params.buffer_kb)
            .param("burn_ms", unit_params.burn_ms);
        let id = record.id;
        let token = record.cancel.clone();
        let result =
            SimulationResult::started(&record, format!("dispatching {} work units", units));
        self.registry.register(record);

        let (done_tx, done_rx) = channel::bounded::<()>(units);
        for _ in 0..units {
            let sim = Arc::clone(self);
            let unit_token = token.clone();
            let done = done_tx.clone();
            let unit = unit_params.clone();
            self.pool.spawn_tracked(move || {
                match sim.run_unit(unit, &unit_token) {
                    Ok(report) => debug!(
                        "work unit held {} ms over {} iterations",
                        report.elapsed_ms, report.iterations
                    ),
                    Err(WorkUnitError::Cancelled) => debug!("work unit cancelled"),
                    Err(e) => debug!("work unit failed: {}", e),
                }
                let _ = done.try_send(());
            });
        }
        drop(done_tx);

        let registry = Arc::clone(&self.registry);
        let spawned = thread::Builder::new()
            .name("overload-load-coord".into())
            .spawn(move || {
                let _guard = RegistryGuard::new(registry, id);
                let mut finished = 0usize;
                while finished < units {
                    match done_rx.recv_timeout(COORDINATOR_POLL) {
                        Ok(()) => finished += 1,
                        Err(RecvTimeoutError::Timeout) => {
                            if token.is_cancelled() {
                                debug!("load test {} cancelled with {} units out", id, finished);
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("load test {} done ({}/{} units)", id, finished, units);
            });

        match spawned {
            Ok(handle) => {
                let mut coordinators = self.coordinators.lock();
                coordinators.retain(|h| !h.is_finished());
                coordinators.push(handle);
                info!("load test {}: {} units dispatched", id, units);
                result
            }
            Err(e) => {
                self.registry.unregister(id);
                warn!("load coordinator failed to spawn: {}", e);
                SimulationResult::rejected(format!("coordinator spawn failed: {}", e))
                    .param("units", units)
            }
        }
    }

    pub fn current_stats(&self) -> LoadTestStats {
        LoadTestStats {
            in_flight: self.in_flight.load(Ordering::Relaxed),
            completed_total: self.completed_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            window_units: self.window.units(),
            window_peak_concurrency: self.window.peak_concurrency(),
            last_report: self.last_report.read().clone(),
        }
    }

    /// Stop the reporter and join batch coordinators. Batch tokens must be
    /// cancelled first for this to return promptly.
    pub fn shutdown(&self) {
        self.reporter_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reporter_handle.lock().take() {
            if handle.join().is_err() {
                warn!("load reporter panicked");
            }
        }
        let coordinators: Vec<JoinHandle<()>> = self.coordinators.lock().drain(..).collect();
        for handle in coordinators {
            if handle.join().is_err() {
                warn!("load coordinator panicked");
            }
        }
    }

    fn maybe_fail<R: Rng>(
        &self,
        rng: &mut R,
        elapsed: Duration,
        concurrent: u64,
    ) -> Option<SimulatedFailure> {
        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed_ms <= self.config.failure_threshold_ms {
            return None;
        }
        let probability = self.config.failure_probability;
        if !probability.is_finite() || probability <= 0.0 {
            return None;
        }
        if !rng.gen_bool(probability.min(1.0)) {
            return None;
        }
        self.failure_pool.draw(
            rng,
            &FailureContext {
                elapsed_ms,
                concurrent,
            },
        )
    }
}

impl Drop for LoadWorkSimulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Releases the concurrency slot and records the outcome no matter how the
/// unit exits. Cancelled units stay out of the latency window; everything
/// else is either a completion or a failure.
struct UnitGuard<'a> {
    sim: &'a LoadWorkSimulator,
    started: Instant,
    concurrent_at_start: u64,
    held_target_ms: u64,
    outcome: WorkOutcome,
}

impl Drop for UnitGuard<'_> {
    fn drop(&mut self) {
        self.sim.in_flight.fetch_sub(1, Ordering::SeqCst);
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match self.outcome {
            WorkOutcome::Completed => {
                self.sim.window.record_unit(elapsed_ms, false);
                self.sim.completed_total.fetch_add(1, Ordering::Relaxed);
            }
            WorkOutcome::Failed => {
                self.sim.window.record_unit(elapsed_ms, true);
                self.sim.failed_total.fetch_add(1, Ordering::Relaxed);
            }
            WorkOutcome::Cancelled => {}
        }
        self.sim
            .broadcaster
            .publish(Notification::WorkSample(WorkUnitSample {
                elapsed_ms,
                concurrent_at_start: self.concurrent_at_start,
                held_target_ms: self.held_target_ms,
                outcome: self.outcome,
            }));
    }
}

/// Dirty one byte per page so the buffer stays resident for the hold.
fn touch_pages(buffer: &mut [u8], seed: u64) {
    let step = (seed as u8).wrapping_add(1);
    let mut offset = 0usize;
    while offset < buffer.len() {
        buffer[offset] = buffer[offset].wrapping_add(step);
        offset += PAGE_STRIDE;
    }
}

fn spawn_reporter(
    config: &LoadWorkConfig,
    window: Arc<WindowStats>,
    last_report: Arc<RwLock<Option<LoadReport>>>,
    broadcaster: Arc<Broadcaster>,
    running: Arc<AtomicBool>,
) -> EngineResult<JoinHandle<()>> {
    let interval = Duration::from_millis(config.report_interval_ms.max(1));
    thread::Builder::new()
        .name("overload-load-report".into())
        .spawn(move || {
            let mut window_start = Instant::now();
            while running.load(Ordering::Relaxed) {
                let elapsed = window_start.elapsed();
                if elapsed < interval {
                    thread::sleep((interval - elapsed).min(REPORT_SLICE));
                    continue;
                }

                let window_ms = elapsed.as_millis() as u64;
                window_start = Instant::now();
                let drain = window.drain();
                if drain.units == 0 {
                    debug!("load report window empty, nothing to publish");
                    continue;
                }

                let report = LoadReport::from_window(&drain, window_ms);
                info!(
                    "load report: {} units ({} failed), avg {:.1} ms, max {} ms, peak concurrency {}",
                    report.units,
                    report.failed,
                    report.avg_elapsed_ms,
                    report.max_elapsed_ms,
                    report.peak_concurrency
                );
                *last_report.write() = Some(report.clone());
                broadcaster.publish(Notification::LoadReport(report));
            }
        })
        .map_err(|e| EngineError::spawn(format!("load reporter thread: {}", e)))
}
