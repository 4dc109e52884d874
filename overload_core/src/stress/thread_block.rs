//! Worker starvation
//!
//! Occupies N workers of the shared pool with synchronous sleeps so that
//! queued work behind them stalls. One coordinator thread per request waits
//! for all of its units to come back and then retires the record.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::ThreadBlockConfig;
use crate::pool::SharedPool;
use crate::registry::record::{SimulationKind, SimulationRecord, SimulationResult};
use crate::registry::SimulationRegistry;
use crate::stress::{sleep_cancellable, RegistryGuard};

const SLEEP_SLICE: Duration = Duration::from_millis(50);
const COORDINATOR_POLL: Duration = Duration::from_millis(100);

/// Thread-block request: occupy `concurrency` pool workers for `delay_ms`
/// each. Delay is floored and concurrency clamped to the configured cap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadBlockParams {
    pub delay_ms: u64,
    pub concurrency: usize,
}

impl Default for ThreadBlockParams {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            concurrency: 4,
        }
    }
}

pub struct ThreadBlockGenerator {
    registry: Arc<SimulationRegistry>,
    pool: Arc<SharedPool>,
    config: ThreadBlockConfig,
    coordinators: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadBlockGenerator {
    pub fn new(
        registry: Arc<SimulationRegistry>,
        pool: Arc<SharedPool>,
        config: ThreadBlockConfig,
    ) -> Self {
        Self {
            registry,
            pool,
            config,
            coordinators: Mutex::new(Vec::new()),
        }
    }

    /// Tie up pool workers with blocking sleeps.
    ///
    /// Requesting more units than the pool has workers is allowed; the
    /// surplus queues behind the blocked ones, which is itself a useful
    /// starvation scenario.
    pub fn start(&self, params: ThreadBlockParams) -> SimulationResult {
        let delay_ms = params.delay_ms.max(self.config.min_delay_ms);
        let concurrency = params.concurrency.clamp(1, self.config.max_concurrency);

        let record = SimulationRecord::new(SimulationKind::ThreadBlock)
            .param("delay_ms", delay_ms)
            .param("concurrency", concurrency);
        let id = record.id;
        let token = record.cancel.clone();
        let result = SimulationResult::started(
            &record,
            format!("blocking {} workers for {} ms", concurrency, delay_ms),
        )
        .with_estimated_end(record.started_at_ms.saturating_add(delay_ms));
        self.registry.register(record);

        let (done_tx, done_rx) = channel::bounded::<()>(concurrency);
        let delay = Duration::from_millis(delay_ms);
        for _ in 0..concurrency {
            let done = done_tx.clone();
            let unit_token = token.clone();
            self.pool.spawn_tracked(move || {
                // Synchronous sleep on purpose: the pool thread must stay
                // occupied for the full delay
                let cancelled = sleep_cancellable(delay, &unit_token, SLEEP_SLICE);
                if cancelled {
                    debug!("thread block unit released early by cancellation");
                }
                let _ = done.try_send(());
            });
        }
        drop(done_tx);

        let registry = Arc::clone(&self.registry);
        let spawned = thread::Builder::new()
            .name("overload-tb-coord".into())
            .spawn(move || {
                let _guard = RegistryGuard::new(registry, id);
                let mut finished = 0usize;
                while finished < concurrency {
                    match done_rx.recv_timeout(COORDINATOR_POLL) {
                        Ok(()) => finished += 1,
                        Err(RecvTimeoutError::Timeout) => {
                            if token.is_cancelled() {
                                debug!("thread block {} cancelled, not waiting for units", id);
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("thread block {} done ({}/{} units)", id, finished, concurrency);
            });

        match spawned {
            Ok(handle) => {
                let mut coordinators = self.coordinators.lock();
                coordinators.retain(|h| !h.is_finished());
                coordinators.push(handle);
                info!(
                    "thread block {}: {} workers for {} ms",
                    id, concurrency, delay_ms
                );
                result
            }
            Err(e) => {
                self.registry.unregister(id);
                warn!("thread block coordinator failed to spawn: {}", e);
                SimulationResult::rejected(format!("coordinator spawn failed: {}", e))
                    .param("delay_ms", delay_ms)
                    .param("concurrency", concurrency)
            }
        }
    }

    /// Join any coordinator threads still waiting on their units. Tokens
    /// must already be cancelled or the delays elapsed for this to return
    /// promptly.
    pub fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self.coordinators.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("thread block coordinator panicked");
            }
        }
    }
}

impl Drop for ThreadBlockGenerator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ObservabilityConfig, PoolConfig};
    use crate::observability::broadcast::Broadcaster;
    use std::time::Instant;

    fn test_fixture(workers: usize) -> (ThreadBlockGenerator, Arc<SimulationRegistry>, Arc<SharedPool>) {
        let obs = ObservabilityConfig {
            queue_capacity: 64,
            drain_idle_ms: 1,
            ..ObservabilityConfig::default()
        };
        let registry = Arc::new(SimulationRegistry::new(Arc::new(
            Broadcaster::new(&obs).unwrap(),
        )));
        let pool = Arc::new(
            SharedPool::new(&PoolConfig {
                worker_threads: workers,
                thread_name: "tb-test-pool".into(),
                shutdown_wait_ms: 500,
            })
            .unwrap(),
        );
        let generator =
            ThreadBlockGenerator::new(Arc::clone(&registry), Arc::clone(&pool), ThreadBlockConfig {
                min_delay_ms: 10,
                max_concurrency: 64,
            });
        (generator, registry, pool)
    }

    fn wait_for<F: Fn() -> bool>(deadline: Duration, check: F) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        check()
    }

    #[test]
    fn test_record_retired_after_delay_elapses() {
        let (generator, registry, _pool) = test_fixture(4);

        let result = generator.start(ThreadBlockParams {
            delay_ms: 50,
            concurrency: 2,
        });
        assert!(result.is_started());
        assert_eq!(registry.count_active_by_kind(SimulationKind::ThreadBlock), 1);

        assert!(
            wait_for(Duration::from_secs(5), || registry.count_active() == 0),
            "record should retire once both units wake"
        );
        generator.shutdown();
    }

    #[test]
    fn test_params_clamped_and_echoed() {
        let (generator, registry, _pool) = test_fixture(2);

        // below the floor and above the cap
        let result = generator.start(ThreadBlockParams {
            delay_ms: 1,
            concurrency: 1000,
        });
        assert!(result.is_started());
        assert_eq!(result.actual_params["delay_ms"], 10u64);
        assert_eq!(result.actual_params["concurrency"], 64u64);

        registry.cancel_all();
        generator.shutdown();
    }

    #[test]
    fn test_cancellation_releases_blocked_workers() {
        let (generator, registry, pool) = test_fixture(2);

        let result = generator.start(ThreadBlockParams {
            delay_ms: 30_000,
            concurrency: 2,
        });
        assert!(result.is_started());
        assert!(
            wait_for(Duration::from_secs(5), || pool.in_flight() == 2),
            "both workers should be occupied"
        );

        registry.cancel_all();
        assert!(
            wait_for(Duration::from_secs(5), || pool.in_flight() == 0),
            "cancellation should free the workers well before the delay"
        );
        assert_eq!(registry.count_active(), 0);
        generator.shutdown();
    }
}
