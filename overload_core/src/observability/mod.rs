//! Starvation-immune observability plane
//!
//! Two dedicated OS threads, never pool workers: a sampler that captures an
//! immutable [`MetricsSnapshot`] on a fixed interval, and a delivery thread
//! that fans notifications out to subscribers (see [`broadcast`]). Neither
//! loop ever waits on the shared pool, so snapshots keep flowing while the
//! pool is deliberately exhausted.

pub mod broadcast;
pub mod sampler;
pub mod snapshot;

pub use broadcast::{Broadcaster, Notification, Subscriber, SubscriberId};
pub use snapshot::MetricsSnapshot;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};

use crate::config::ObservabilityConfig;
use crate::error::EngineResult;
use crate::pool::SharedPool;
use crate::registry::SimulationRegistry;

/// Owns the sampler thread and the latest-snapshot slot.
///
/// The broadcaster is shared with the registry (lifecycle events) and the
/// load simulator (reports), so its shutdown belongs to the engine, not the
/// plane.
pub struct ObservabilityPlane {
    latest: Arc<RwLock<Option<MetricsSnapshot>>>,
    broadcaster: Arc<Broadcaster>,
    running: Arc<AtomicBool>,
    sampler_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ObservabilityPlane {
    pub fn new(
        config: &ObservabilityConfig,
        pool: Arc<SharedPool>,
        registry: Arc<SimulationRegistry>,
        broadcaster: Arc<Broadcaster>,
    ) -> EngineResult<Self> {
        let latest = Arc::new(RwLock::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let handle = sampler::spawn_sampler(
            config,
            pool,
            registry,
            Arc::clone(&broadcaster),
            Arc::clone(&latest),
            Arc::clone(&running),
        )?;

        Ok(Self {
            latest,
            broadcaster,
            running,
            sampler_handle: Mutex::new(Some(handle)),
        })
    }

    /// Most recent sampler reading, if one has been taken yet.
    pub fn latest_snapshot(&self) -> Option<MetricsSnapshot> {
        self.latest.read().clone()
    }

    pub fn subscribe(&self, handler: Arc<dyn Subscriber>) -> SubscriberId {
        self.broadcaster.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    /// Metrics-class notifications displaced by backpressure so far.
    pub fn dropped_metrics(&self) -> u64 {
        self.broadcaster.dropped_metrics()
    }

    /// Lifecycle events displaced by backpressure so far.
    pub fn dropped_events(&self) -> u64 {
        self.broadcaster.dropped_events()
    }

    /// Stop the sampler thread. The shared broadcaster is left running.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.sampler_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ObservabilityPlane {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::registry::record::{SimulationKind, SimulationRecord};
    use std::time::{Duration, Instant};

    fn test_plane() -> (ObservabilityPlane, Arc<SimulationRegistry>) {
        let config = ObservabilityConfig {
            sample_interval_ms: 20,
            queue_capacity: 64,
            drain_idle_ms: 1,
        };
        let pool = Arc::new(
            SharedPool::new(&PoolConfig {
                worker_threads: 1,
                ..PoolConfig::default()
            })
            .unwrap(),
        );
        let broadcaster = Arc::new(Broadcaster::new(&config).unwrap());
        let registry = Arc::new(SimulationRegistry::new(Arc::clone(&broadcaster)));
        let plane =
            ObservabilityPlane::new(&config, pool, Arc::clone(&registry), broadcaster).unwrap();
        (plane, registry)
    }

    fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_snapshots_appear_and_advance() {
        let (plane, _registry) = test_plane();

        assert!(
            wait_for(|| plane.latest_snapshot().is_some(), Duration::from_secs(2)),
            "sampler should produce a first snapshot"
        );
        let first = plane.latest_snapshot().unwrap();

        assert!(
            wait_for(
                || plane
                    .latest_snapshot()
                    .map(|s| s.timestamp_ms > first.timestamp_ms)
                    .unwrap_or(false),
                Duration::from_secs(2)
            ),
            "snapshots should keep advancing"
        );
    }

    #[test]
    fn test_snapshot_reflects_active_simulations() {
        let (plane, registry) = test_plane();
        registry.register(SimulationRecord::new(SimulationKind::Memory));

        assert!(
            wait_for(
                || plane
                    .latest_snapshot()
                    .map(|s| s.active_simulations == 1)
                    .unwrap_or(false),
                Duration::from_secs(2)
            ),
            "sampler should pick up the registry count"
        );
    }
}
