//! Concurrency-safe catalog of running simulations
//!
//! The registry is the leaf component everything else registers into. All
//! operations are callable from any thread without external locking, and a
//! read (list, count, lookup) is always safe during concurrent mutation.
//! Registration and removal publish lifecycle notifications through the
//! broadcaster in call order.

pub mod record;

pub use record::{
    SimulationId, SimulationKind, SimulationRecord, SimulationResult, SimulationStatus,
    SimulationSummary,
};

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{info, warn};

use crate::observability::broadcast::{Broadcaster, Notification};

/// Catalog of currently running simulations, keyed by id.
pub struct SimulationRegistry {
    records: DashMap<SimulationId, SimulationRecord>,
    broadcaster: Arc<Broadcaster>,
}

impl SimulationRegistry {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            records: DashMap::new(),
            broadcaster,
        }
    }

    /// Add a record and announce the start.
    ///
    /// Ids are generated at record creation, so a collision means a caller
    /// registered the same record twice; the existing entry wins and the
    /// duplicate is dropped with a warning.
    pub fn register(&self, record: SimulationRecord) -> SimulationId {
        let id = record.id;
        let kind = record.kind;
        match self.records.entry(id) {
            Entry::Occupied(_) => {
                warn!("simulation {} already registered, keeping existing entry", id);
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                self.broadcaster
                    .publish(Notification::SimulationStarted { kind, id });
            }
        }
        id
    }

    /// Remove a record and announce the completion. Returns whether the id
    /// was present.
    pub fn unregister(&self, id: SimulationId) -> bool {
        match self.records.remove(&id) {
            Some((_, record)) => {
                self.broadcaster.publish(Notification::SimulationCompleted {
                    kind: record.kind,
                    id,
                });
                true
            }
            None => false,
        }
    }

    /// Snapshot of every active simulation, safe to take during concurrent
    /// registration and removal.
    pub fn list_active(&self) -> Vec<SimulationSummary> {
        self.records
            .iter()
            .map(|entry| entry.value().summary())
            .collect()
    }

    pub fn count_active(&self) -> usize {
        self.records.len()
    }

    pub fn count_active_by_kind(&self, kind: SimulationKind) -> usize {
        self.records
            .iter()
            .filter(|entry| entry.value().kind == kind)
            .count()
    }

    /// Point lookup.
    pub fn get(&self, id: SimulationId) -> Option<SimulationSummary> {
        self.records.get(&id).map(|entry| entry.value().summary())
    }

    /// Signal one simulation's cancellation token without removing its
    /// record; the owning workload unregisters itself on the way out.
    pub fn cancel(&self, id: SimulationId) -> bool {
        match self.records.get(&id) {
            Some(entry) => {
                entry.value().cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Emergency reset: signal every held token and clear the catalog,
    /// returning how many simulations were signalled. Tokens that were
    /// already cancelled still count. Each cleared record gets its
    /// completion notification here, since the workload's own unregister
    /// will find the entry already gone.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<SimulationId> = self.records.iter().map(|entry| *entry.key()).collect();
        let mut signalled = 0;
        for id in ids {
            if let Some((_, record)) = self.records.remove(&id) {
                record.cancel.cancel();
                self.broadcaster.publish(Notification::SimulationCompleted {
                    kind: record.kind,
                    id,
                });
                signalled += 1;
            }
        }
        if signalled > 0 {
            info!("cancelled {} active simulations", signalled);
        }
        signalled
    }
}
