//! Fire-and-forget notification fan-out
//!
//! Producers push into a bounded queue and never wait for consumers; a
//! dedicated delivery thread drains the queue and dispatches to subscribers.
//! When the queue is full the oldest pending notification is displaced so the
//! producer still returns immediately. Displaced metrics are routine
//! backpressure; a displaced lifecycle event is counted and logged rather
//! than vanishing silently.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use log::{debug, error, warn};
use parking_lot::{Mutex, RwLock};

use crate::config::ObservabilityConfig;
use crate::error::{EngineError, EngineResult};
use crate::loadwork::stats::{LoadReport, WorkUnitSample};
use crate::observability::snapshot::MetricsSnapshot;
use crate::registry::record::{SimulationId, SimulationKind};

/// Everything the plane can push to subscribers
#[derive(Debug, Clone)]
pub enum Notification {
    /// Periodic sampler reading (lossy under backpressure)
    Snapshot(MetricsSnapshot),
    /// A simulation entered the registry
    SimulationStarted {
        kind: SimulationKind,
        id: SimulationId,
    },
    /// A simulation left the registry
    SimulationCompleted {
        kind: SimulationKind,
        id: SimulationId,
    },
    /// One load-work unit finished (lossy under backpressure)
    WorkSample(WorkUnitSample),
    /// One reporting window's load aggregate
    LoadReport(LoadReport),
}

impl Notification {
    /// Everything is at-most-once, but a displaced lifecycle event is worth
    /// a warning while a displaced metric is routine backpressure.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Notification::SimulationStarted { .. } | Notification::SimulationCompleted { .. }
        )
    }
}

/// Receiver side of the plane. All methods have default no-op bodies, so a
/// subscriber implements only what it cares about.
///
/// Calls arrive on the delivery thread; implementations should return
/// promptly. A panicking subscriber is logged and skipped for that
/// notification without affecting the others.
pub trait Subscriber: Send + Sync {
    fn on_snapshot(&self, _snapshot: &MetricsSnapshot) {}
    fn on_simulation_started(&self, _kind: SimulationKind, _id: SimulationId) {}
    fn on_simulation_completed(&self, _kind: SimulationKind, _id: SimulationId) {}
    fn on_work_sample(&self, _sample: &WorkUnitSample) {}
    fn on_load_report(&self, _report: &LoadReport) {}
}

/// Handle for removing a subscriber
pub type SubscriberId = u64;

type SubscriberList = Arc<RwLock<Vec<(SubscriberId, Arc<dyn Subscriber>)>>>;

/// Bounded queue plus a dedicated delivery thread.
pub struct Broadcaster {
    queue: Arc<ArrayQueue<Notification>>,
    subscribers: SubscriberList,
    running: Arc<AtomicBool>,
    next_subscriber_id: AtomicU64,
    dropped_metrics: AtomicU64,
    dropped_events: AtomicU64,
    drain_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Broadcaster {
    /// Build the queue and spawn the delivery thread.
    pub fn new(config: &ObservabilityConfig) -> EngineResult<Self> {
        let queue = Arc::new(ArrayQueue::new(config.queue_capacity.max(1)));
        let subscribers: SubscriberList = Arc::new(RwLock::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));

        let drain_queue = Arc::clone(&queue);
        let drain_subscribers = Arc::clone(&subscribers);
        let drain_running = Arc::clone(&running);
        let idle = Duration::from_millis(config.drain_idle_ms.max(1));

        let handle = thread::Builder::new()
            .name("overload-delivery".to_string())
            .spawn(move || {
                while drain_running.load(Ordering::Relaxed) {
                    match drain_queue.pop() {
                        Some(notification) => deliver(&drain_subscribers, &notification),
                        None => {
                            // No pending notifications, sleep briefly to
                            // avoid busy-waiting
                            thread::sleep(idle);
                        }
                    }
                }
                // Final drain so lifecycle events queued during shutdown are
                // still delivered
                while let Some(notification) = drain_queue.pop() {
                    deliver(&drain_subscribers, &notification);
                }
            })
            .map_err(|e| EngineError::spawn(format!("delivery thread: {}", e)))?;

        Ok(Self {
            queue,
            subscribers,
            running,
            next_subscriber_id: AtomicU64::new(1),
            dropped_metrics: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
            drain_handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a notification without waiting. When the queue is full the
    /// oldest entry is displaced to make room and accounted by class.
    pub fn publish(&self, notification: Notification) {
        if let Some(displaced) = self.queue.force_push(notification) {
            if displaced.is_lifecycle() {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                warn!("notification queue full, displaced lifecycle event: {:?}", displaced);
            } else {
                self.dropped_metrics.fetch_add(1, Ordering::Relaxed);
                debug!("notification queue full, displaced a metrics notification");
            }
        }
    }

    pub fn subscribe(&self, handler: Arc<dyn Subscriber>) -> SubscriberId {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push((id, handler));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Metrics-class notifications displaced by backpressure.
    pub fn dropped_metrics(&self) -> u64 {
        self.dropped_metrics.load(Ordering::Relaxed)
    }

    /// Lifecycle events displaced by backpressure (should stay at zero with
    /// a sanely sized queue).
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Stop the delivery thread after one final drain of the queue.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.drain_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Dispatch one notification to every subscriber, isolating failures.
fn deliver(subscribers: &SubscriberList, notification: &Notification) {
    // Clone the list so a slow subscriber never holds the registration lock
    let handlers: Vec<(SubscriberId, Arc<dyn Subscriber>)> =
        subscribers.read().iter().cloned().collect();

    for (id, handler) in handlers {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            dispatch(handler.as_ref(), notification)
        }));
        if let Err(panic) = result {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            error!("subscriber {} panicked during delivery: {}", id, msg);
        }
    }
}

fn dispatch(handler: &dyn Subscriber, notification: &Notification) {
    match notification {
        Notification::Snapshot(snapshot) => handler.on_snapshot(snapshot),
        Notification::SimulationStarted { kind, id } => handler.on_simulation_started(*kind, *id),
        Notification::SimulationCompleted { kind, id } => {
            handler.on_simulation_completed(*kind, *id)
        }
        Notification::WorkSample(sample) => handler.on_work_sample(sample),
        Notification::LoadReport(report) => handler.on_load_report(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct CountingSubscriber {
        started: AtomicUsize,
        completed: AtomicUsize,
        snapshots: AtomicUsize,
    }

    impl CountingSubscriber {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                snapshots: AtomicUsize::new(0),
            })
        }
    }

    impl Subscriber for CountingSubscriber {
        fn on_snapshot(&self, _snapshot: &MetricsSnapshot) {
            self.snapshots.fetch_add(1, Ordering::SeqCst);
        }
        fn on_simulation_started(&self, _kind: SimulationKind, _id: SimulationId) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_simulation_completed(&self, _kind: SimulationKind, _id: SimulationId) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingSubscriber;

    impl Subscriber for PanickingSubscriber {
        fn on_simulation_started(&self, _kind: SimulationKind, _id: SimulationId) {
            panic!("intentional test panic");
        }
    }

    struct SlowSubscriber;

    impl Subscriber for SlowSubscriber {
        fn on_snapshot(&self, _snapshot: &MetricsSnapshot) {
            thread::sleep(Duration::from_millis(20));
        }
    }

    fn test_broadcaster(capacity: usize) -> Broadcaster {
        let config = ObservabilityConfig {
            queue_capacity: capacity,
            drain_idle_ms: 1,
            ..ObservabilityConfig::default()
        };
        Broadcaster::new(&config).unwrap()
    }

    fn test_snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp_ms: 0,
            uptime_secs: 0,
            pid: 0,
            process_cpu_percent: 0.0,
            resident_bytes: 0,
            virtual_bytes: 0,
            available_bytes: 0,
            pool_workers: 0,
            pool_queued: 0,
            pool_in_flight: 0,
            active_simulations: 0,
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_events_reach_subscriber() {
        let broadcaster = test_broadcaster(64);
        let counter = CountingSubscriber::new();
        broadcaster.subscribe(counter.clone());

        let id = SimulationId::new();
        broadcaster.publish(Notification::SimulationStarted {
            kind: SimulationKind::Cpu,
            id,
        });
        broadcaster.publish(Notification::SimulationCompleted {
            kind: SimulationKind::Cpu,
            id,
        });

        assert!(
            wait_for(
                || counter.started.load(Ordering::SeqCst) == 1
                    && counter.completed.load(Ordering::SeqCst) == 1,
                Duration::from_secs(2)
            ),
            "both lifecycle events should be delivered"
        );
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let broadcaster = test_broadcaster(64);
        broadcaster.subscribe(Arc::new(PanickingSubscriber));
        let counter = CountingSubscriber::new();
        broadcaster.subscribe(counter.clone());

        broadcaster.publish(Notification::SimulationStarted {
            kind: SimulationKind::Memory,
            id: SimulationId::new(),
        });

        assert!(
            wait_for(
                || counter.started.load(Ordering::SeqCst) == 1,
                Duration::from_secs(2)
            ),
            "healthy subscriber should still receive the event"
        );
    }

    #[test]
    fn test_full_queue_displaces_oldest_and_counts_it() {
        let broadcaster = test_broadcaster(4);
        broadcaster.subscribe(Arc::new(SlowSubscriber));

        // Far more snapshots than a 4-slot queue with a 20ms-per-delivery
        // consumer can absorb
        for _ in 0..100 {
            broadcaster.publish(Notification::Snapshot(test_snapshot()));
        }

        assert!(
            broadcaster.dropped_metrics() > 0,
            "displaced snapshots must be accounted"
        );
        assert_eq!(
            broadcaster.dropped_events(),
            0,
            "no lifecycle events were published"
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let broadcaster = test_broadcaster(64);
        let counter = CountingSubscriber::new();
        let sid = broadcaster.subscribe(counter.clone());

        assert!(broadcaster.unsubscribe(sid));
        assert!(!broadcaster.unsubscribe(sid), "second remove finds nothing");

        broadcaster.publish(Notification::Snapshot(test_snapshot()));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.snapshots.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_shutdown_drains_pending_events() {
        let broadcaster = test_broadcaster(64);
        let counter = CountingSubscriber::new();
        broadcaster.subscribe(counter.clone());

        for _ in 0..10 {
            broadcaster.publish(Notification::SimulationStarted {
                kind: SimulationKind::LoadTest,
                id: SimulationId::new(),
            });
        }
        broadcaster.shutdown();

        assert_eq!(
            counter.started.load(Ordering::SeqCst),
            10,
            "shutdown must drain queued events before joining"
        );
    }
}
