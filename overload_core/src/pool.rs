//! Shared worker pool, the resource the lab deliberately exhausts
//!
//! A dedicated tokio multi-thread runtime with a fixed worker count stands in
//! for the request-handling pool of a real service. Starvation scenarios
//! (ThreadBlock units, load-work units) are spawned onto it through
//! [`SharedPool::spawn_tracked`] and intentionally block their worker instead
//! of yielding. Everything that must stay live under starvation runs on
//! dedicated OS threads elsewhere and only ever *reads* this pool's gauges.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::error::{EngineError, EngineResult};

/// Fixed-size worker pool with its own queue/in-flight gauges.
///
/// The gauges are maintained by `spawn_tracked` rather than read from the
/// runtime, so the sampler can report pool depth without touching runtime
/// internals that a starved pool might be slow to answer.
pub struct SharedPool {
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    handle: tokio::runtime::Handle,
    workers: usize,
    shutdown_wait_ms: u64,
    submitted: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
}

impl SharedPool {
    /// Build the pool runtime. `worker_threads == 0` sizes it to the logical
    /// CPU count.
    pub fn new(config: &PoolConfig) -> EngineResult<Self> {
        let workers = if config.worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            config.worker_threads
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name(config.thread_name.clone())
            .enable_time()
            .build()
            .map_err(|e| EngineError::pool(format!("failed to build shared runtime: {}", e)))?;
        let handle = runtime.handle().clone();

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            workers,
            shutdown_wait_ms: config.shutdown_wait_ms,
            submitted: AtomicU64::new(0),
            started: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        })
    }

    /// Spawn a blocking unit of work onto the pool, maintaining the gauges.
    ///
    /// The closure runs directly on a pool worker and is expected to occupy
    /// it. A panicking task still releases its in-flight slot.
    pub fn spawn_tracked<F>(self: &Arc<Self>, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        let pool = Arc::clone(self);
        self.handle.spawn(async move {
            pool.started.fetch_add(1, Ordering::Relaxed);
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
            pool.completed.fetch_add(1, Ordering::Relaxed);
            if let Err(panic) = result {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                log::warn!("pool task panicked: {}", msg);
            }
        });
    }

    /// Configured worker thread count.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Tasks submitted but not yet picked up by a worker.
    pub fn queued(&self) -> u64 {
        self.submitted
            .load(Ordering::Relaxed)
            .saturating_sub(self.started.load(Ordering::Relaxed))
    }

    /// Tasks currently occupying a worker.
    pub fn in_flight(&self) -> u64 {
        self.started
            .load(Ordering::Relaxed)
            .saturating_sub(self.completed.load(Ordering::Relaxed))
    }

    /// Lifetime count of finished tasks.
    pub fn completed_tasks(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Shut the runtime down, waiting up to `wait` for in-flight tasks.
    /// Tasks still blocking a worker after the wait are abandoned.
    pub fn shutdown(&self, wait: Duration) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_timeout(wait);
        }
    }
}

impl Drop for SharedPool {
    fn drop(&mut self) {
        self.shutdown(Duration::from_millis(self.shutdown_wait_ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn test_pool(workers: usize) -> Arc<SharedPool> {
        let config = PoolConfig {
            worker_threads: workers,
            ..PoolConfig::default()
        };
        Arc::new(SharedPool::new(&config).unwrap())
    }

    #[test]
    fn test_spawned_task_runs_and_gauges_settle() {
        let pool = test_pool(1);
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        pool.spawn_tracked(move || flag.store(true, Ordering::SeqCst));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while pool.completed_tasks() < 1 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert!(ran.load(Ordering::SeqCst), "task should have executed");
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn test_panicking_task_releases_its_slot() {
        let pool = test_pool(1);
        pool.spawn_tracked(|| panic!("intentional test panic"));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while pool.completed_tasks() < 1 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(pool.in_flight(), 0, "panicked task must not leak a slot");
    }

    #[test]
    fn test_blocked_worker_queues_excess_tasks() {
        let pool = test_pool(1);

        // first task occupies the single worker, second must queue
        pool.spawn_tracked(|| thread::sleep(Duration::from_millis(300)));
        pool.spawn_tracked(|| {});

        // give the first task time to be picked up
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while pool.in_flight() < 1 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pool.queued(), 1, "second task should wait behind the blocked worker");

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while pool.completed_tasks() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.completed_tasks(), 2);
    }
}
