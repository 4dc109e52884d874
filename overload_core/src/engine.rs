//! Engine wiring
//!
//! Owns the shared pool, the registry, the broadcaster, and one instance of
//! each workload generator. Construction brings the sampler and reporter
//! threads up; [`StressEngine::shutdown`] tears everything down in
//! dependency order and may be called more than once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::loadwork::{
    LoadTestParams, LoadTestStats, LoadWorkSimulator, WorkUnitError, WorkUnitParams,
    WorkUnitReport,
};
use crate::observability::{
    Broadcaster, MetricsSnapshot, ObservabilityPlane, Subscriber, SubscriberId,
};
use crate::pool::SharedPool;
use crate::registry::record::{
    SimulationId, SimulationKind, SimulationResult, SimulationSummary,
};
use crate::registry::SimulationRegistry;
use crate::stress::{
    CpuStressGenerator, CpuStressParams, MemoryReleaseReport, MemoryStressGenerator,
    MemoryStressParams, ThreadBlockGenerator, ThreadBlockParams,
};

pub struct StressEngine {
    config: EngineConfig,
    pool: Arc<SharedPool>,
    broadcaster: Arc<Broadcaster>,
    registry: Arc<SimulationRegistry>,
    observability: ObservabilityPlane,
    cpu: CpuStressGenerator,
    memory: MemoryStressGenerator,
    thread_block: ThreadBlockGenerator,
    load: Arc<LoadWorkSimulator>,
    running: AtomicBool,
}

impl StressEngine {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let pool = Arc::new(SharedPool::new(&config.pool)?);
        let broadcaster = Arc::new(Broadcaster::new(&config.observability)?);
        let registry = Arc::new(SimulationRegistry::new(Arc::clone(&broadcaster)));
        let observability = ObservabilityPlane::new(
            &config.observability,
            Arc::clone(&pool),
            Arc::clone(&registry),
            Arc::clone(&broadcaster),
        )?;
        let cpu = CpuStressGenerator::new(Arc::clone(&registry), config.cpu.clone());
        let memory = MemoryStressGenerator::new(Arc::clone(&registry), config.memory.clone());
        let thread_block = ThreadBlockGenerator::new(
            Arc::clone(&registry),
            Arc::clone(&pool),
            config.thread_block.clone(),
        );
        let load = Arc::new(LoadWorkSimulator::new(
            Arc::clone(&registry),
            Arc::clone(&pool),
            Arc::clone(&broadcaster),
            config.load.clone(),
        )?);

        info!("stress engine ready ({} pool workers)", pool.workers());
        Ok(Self {
            config,
            pool,
            broadcaster,
            registry,
            observability,
            cpu,
            memory,
            thread_block,
            load,
            running: AtomicBool::new(true),
        })
    }

    pub fn from_yaml(yaml: &str) -> EngineResult<Self> {
        Self::new(EngineConfig::from_yaml(yaml)?)
    }

    // Workload entry points

    pub fn start_cpu(&self, params: CpuStressParams) -> SimulationResult {
        self.cpu.start(params)
    }

    pub fn start_memory(&self, params: MemoryStressParams) -> SimulationResult {
        self.memory.allocate(params)
    }

    pub fn start_thread_block(&self, params: ThreadBlockParams) -> SimulationResult {
        self.thread_block.start(params)
    }

    pub fn start_load_test(&self, params: LoadTestParams) -> SimulationResult {
        self.load.start(params)
    }

    /// Run a single work unit synchronously on the calling thread.
    pub fn run_work_unit(
        &self,
        params: WorkUnitParams,
        cancel: &CancelToken,
    ) -> Result<WorkUnitReport, WorkUnitError> {
        self.load.run_unit(params, cancel)
    }

    // Lifecycle control

    /// Signal one simulation to stop. Memory blocks are released on the
    /// spot; thread-based workloads notice their token at the next check.
    /// Returns false for ids that are not active.
    pub fn stop(&self, id: SimulationId) -> bool {
        let summary = match self.registry.get(id) {
            Some(summary) => summary,
            None => return false,
        };
        self.registry.cancel(id);
        if summary.kind == SimulationKind::Memory {
            self.memory.release(id);
        }
        true
    }

    /// Cancel every active simulation and release retained memory. Returns
    /// how many simulations were signalled.
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.registry.cancel_all();
        self.memory.release_all();
        cancelled
    }

    /// Release all retained memory blocks without touching other workloads.
    pub fn release_memory(&self) -> MemoryReleaseReport {
        self.memory.release_all()
    }

    // Views

    pub fn list_active(&self) -> Vec<SimulationSummary> {
        self.registry.list_active()
    }

    pub fn count_active(&self) -> usize {
        self.registry.count_active()
    }

    pub fn count_active_by_kind(&self, kind: SimulationKind) -> usize {
        self.registry.count_active_by_kind(kind)
    }

    pub fn get(&self, id: SimulationId) -> Option<SimulationSummary> {
        self.registry.get(id)
    }

    pub fn latest_snapshot(&self) -> Option<MetricsSnapshot> {
        self.observability.latest_snapshot()
    }

    pub fn subscribe(&self, handler: Arc<dyn Subscriber>) -> SubscriberId {
        self.observability.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.observability.unsubscribe(id)
    }

    pub fn load_stats(&self) -> LoadTestStats {
        self.load.current_stats()
    }

    pub fn registry(&self) -> Arc<SimulationRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Tear everything down: cancel workloads, stop the background threads,
    /// then drain and close the pool. Idempotent.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("stress engine shutting down");
        self.cancel_all();
        self.load.shutdown();
        self.cpu.shutdown();
        self.thread_block.shutdown();
        self.observability.shutdown();
        self.broadcaster.shutdown();
        self.pool
            .shutdown(Duration::from_millis(self.config.pool.shutdown_wait_ms));
    }
}

impl Drop for StressEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
