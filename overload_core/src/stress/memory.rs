//! Retained-memory pressure
//!
//! Each allocation commits one contiguous block and parks it in a cumulative
//! list; the process keeps growing until an explicit release. Every block
//! registers its own simulation record, which stays active for as long as the
//! block is held; memory stress has no natural deadline.

use std::sync::Arc;

use log::info;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::config::MemoryStressConfig;
use crate::registry::record::{
    unix_millis, SimulationId, SimulationKind, SimulationRecord, SimulationResult,
};
use crate::registry::SimulationRegistry;

const BYTES_PER_MB: u64 = 1024 * 1024;
const PAGE_STRIDE: usize = 4096;

/// Memory stress request. Sizes below the configured floor are raised to it;
/// with a total ceiling configured, requests are capped to the remaining
/// headroom.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStressParams {
    pub size_mb: u64,
}

impl Default for MemoryStressParams {
    fn default() -> Self {
        Self { size_mb: 100 }
    }
}

/// One retained allocation. The list below holds the only strong reference
/// to `data`; dropping the block is what frees the memory.
struct MemoryBlock {
    id: SimulationId,
    bytes: u64,
    allocated_at_ms: u64,
    #[allow(dead_code)]
    data: Vec<u8>,
    cancel: CancelToken,
}

/// What a release call gave back.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryReleaseReport {
    pub blocks_released: usize,
    pub bytes_released: u64,
}

pub struct MemoryStressGenerator {
    registry: Arc<SimulationRegistry>,
    config: MemoryStressConfig,
    blocks: Mutex<Vec<MemoryBlock>>,
}

impl MemoryStressGenerator {
    pub fn new(registry: Arc<SimulationRegistry>, config: MemoryStressConfig) -> Self {
        Self {
            registry,
            config,
            blocks: Mutex::new(Vec::new()),
        }
    }

    /// Allocate and retain one block.
    ///
    /// Ceiling exhaustion and allocator refusal both come back as a
    /// `Rejected` result; nothing is registered and the process is never
    /// aborted for an oversized request.
    pub fn allocate(&self, params: MemoryStressParams) -> SimulationResult {
        self.sweep_cancelled();

        let requested_mb = params.size_mb.max(self.config.min_block_mb);
        let granted_mb = match self.config.max_total_mb {
            Some(ceiling_mb) => {
                let held_mb = self.held_bytes() / BYTES_PER_MB;
                requested_mb.min(ceiling_mb.saturating_sub(held_mb))
            }
            None => requested_mb,
        };
        if granted_mb == 0 {
            return SimulationResult::rejected(format!(
                "memory ceiling reached: {} MB requested, no headroom left",
                requested_mb
            ))
            .param("requested_mb", requested_mb);
        }

        let bytes = granted_mb.saturating_mul(BYTES_PER_MB);
        let mut data: Vec<u8> = Vec::new();
        if let Err(e) = data.try_reserve_exact(bytes as usize) {
            return SimulationResult::rejected(format!(
                "allocation of {} MB failed: {}",
                granted_mb, e
            ))
            .param("requested_mb", requested_mb);
        }
        data.resize(bytes as usize, 0);
        // Write a pattern across every page so the block is physically
        // committed, not just address space
        let mut offset = 0usize;
        while offset < data.len() {
            data[offset] = (offset / PAGE_STRIDE) as u8;
            offset += PAGE_STRIDE;
        }

        let record = SimulationRecord::new(SimulationKind::Memory)
            .param("requested_mb", requested_mb)
            .param("size_mb", granted_mb);
        let id = record.id;
        let token = record.cancel.clone();
        let allocated_at_ms = record.started_at_ms;
        let mut result = SimulationResult::started(&record, String::new());

        // Push and register under one lock so a concurrent release never
        // sees a record without its block or vice versa
        let total_mb = {
            let mut blocks = self.blocks.lock();
            blocks.push(MemoryBlock {
                id,
                bytes,
                allocated_at_ms,
                data,
                cancel: token,
            });
            self.registry.register(record);
            blocks.iter().map(|b| b.bytes).sum::<u64>() / BYTES_PER_MB
        };

        result.message = format!("allocated {} MB, {} MB held total", granted_mb, total_mb);
        info!("memory stress {}: +{} MB ({} MB held)", id, granted_mb, total_mb);
        result
    }

    /// Release every held block, unregister their records, and nudge the
    /// allocator to return the pages.
    ///
    /// The trim is best effort: glibc may keep freed pages pooled, so the
    /// observed process size can lag the release.
    pub fn release_all(&self) -> MemoryReleaseReport {
        let drained: Vec<MemoryBlock> = std::mem::take(&mut *self.blocks.lock());
        let blocks_released = drained.len();
        let bytes_released: u64 = drained.iter().map(|b| b.bytes).sum();
        for block in &drained {
            self.registry.unregister(block.id);
        }
        drop(drained);

        if blocks_released > 0 {
            #[cfg(all(target_os = "linux", target_env = "gnu"))]
            unsafe {
                libc::malloc_trim(0);
            }
            info!(
                "released {} memory blocks ({} MB)",
                blocks_released,
                bytes_released / BYTES_PER_MB
            );
        }

        MemoryReleaseReport {
            blocks_released,
            bytes_released,
        }
    }

    /// Release a single block by simulation id. Returns whether it was held.
    pub fn release(&self, id: SimulationId) -> bool {
        let removed: Option<MemoryBlock> = {
            let mut blocks = self.blocks.lock();
            blocks
                .iter()
                .position(|b| b.id == id)
                .map(|i| blocks.swap_remove(i))
        };
        match removed {
            Some(block) => {
                self.registry.unregister(block.id);
                info!(
                    "released memory block {} ({} MB, held {}s)",
                    id,
                    block.bytes / BYTES_PER_MB,
                    unix_millis().saturating_sub(block.allocated_at_ms) / 1000
                );
                true
            }
            None => false,
        }
    }

    /// Total bytes currently retained.
    pub fn held_bytes(&self) -> u64 {
        self.blocks.lock().iter().map(|b| b.bytes).sum()
    }

    /// Blocks currently retained.
    pub fn held_blocks(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Drop blocks whose token was cancelled externally (stop-by-id on a
    /// memory record is routed through [`Self::release`], but a token can
    /// also be signalled directly).
    fn sweep_cancelled(&self) {
        let swept: Vec<MemoryBlock> = {
            let mut blocks = self.blocks.lock();
            let (cancelled, kept): (Vec<_>, Vec<_>) =
                blocks.drain(..).partition(|b| b.cancel.is_cancelled());
            *blocks = kept;
            cancelled
        };
        for block in &swept {
            self.registry.unregister(block.id);
        }
        if !swept.is_empty() {
            info!("swept {} cancelled memory blocks", swept.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObservabilityConfig;
    use crate::observability::broadcast::Broadcaster;

    fn test_generator(max_total_mb: Option<u64>) -> (MemoryStressGenerator, Arc<SimulationRegistry>) {
        let config = ObservabilityConfig {
            queue_capacity: 64,
            drain_idle_ms: 1,
            ..ObservabilityConfig::default()
        };
        let registry = Arc::new(SimulationRegistry::new(Arc::new(
            Broadcaster::new(&config).unwrap(),
        )));
        let generator = MemoryStressGenerator::new(
            Arc::clone(&registry),
            MemoryStressConfig {
                min_block_mb: 1,
                max_total_mb,
            },
        );
        (generator, registry)
    }

    #[test]
    fn test_undersized_request_raised_to_floor() {
        let (generator, registry) = test_generator(None);

        let result = generator.allocate(MemoryStressParams { size_mb: 0 });
        assert!(result.is_started());
        assert_eq!(result.actual_params["size_mb"], 1u64);
        assert_eq!(registry.count_active_by_kind(SimulationKind::Memory), 1);

        generator.release_all();
    }

    #[test]
    fn test_allocations_accumulate_until_release() {
        let (generator, registry) = test_generator(None);

        for _ in 0..3 {
            assert!(generator
                .allocate(MemoryStressParams { size_mb: 2 })
                .is_started());
        }
        assert_eq!(registry.count_active_by_kind(SimulationKind::Memory), 3);
        assert_eq!(generator.held_bytes(), 3 * 2 * BYTES_PER_MB);

        let report = generator.release_all();
        assert_eq!(report.blocks_released, 3);
        assert_eq!(report.bytes_released, 3 * 2 * BYTES_PER_MB);
        assert_eq!(registry.count_active(), 0);
        assert_eq!(generator.held_blocks(), 0);
    }

    #[test]
    fn test_ceiling_caps_then_rejects() {
        let (generator, registry) = test_generator(Some(8));

        let first = generator.allocate(MemoryStressParams { size_mb: 5 });
        assert!(first.is_started());
        assert_eq!(first.actual_params["size_mb"], 5u64);

        // 3 MB of headroom left, so the request is capped
        let second = generator.allocate(MemoryStressParams { size_mb: 5 });
        assert!(second.is_started());
        assert_eq!(second.actual_params["size_mb"], 3u64);

        // no headroom at all now
        let third = generator.allocate(MemoryStressParams { size_mb: 5 });
        assert!(!third.is_started());
        assert_eq!(registry.count_active_by_kind(SimulationKind::Memory), 2);

        generator.release_all();
    }

    #[test]
    fn test_release_by_id_drops_one_block() {
        let (generator, registry) = test_generator(None);

        let first = generator.allocate(MemoryStressParams { size_mb: 1 });
        let second = generator.allocate(MemoryStressParams { size_mb: 2 });

        assert!(generator.release(first.id));
        assert!(!generator.release(first.id), "already gone");
        assert_eq!(generator.held_blocks(), 1);
        assert_eq!(generator.held_bytes(), 2 * BYTES_PER_MB);
        assert!(registry.get(second.id).is_some());
        assert!(registry.get(first.id).is_none());

        generator.release_all();
    }

    #[test]
    fn test_externally_cancelled_block_is_swept() {
        let (generator, registry) = test_generator(None);

        let first = generator.allocate(MemoryStressParams { size_mb: 1 });
        registry.cancel(first.id);

        // next allocate sweeps the cancelled block before sizing
        let second = generator.allocate(MemoryStressParams { size_mb: 1 });
        assert!(second.is_started());
        assert_eq!(generator.held_blocks(), 1);
        assert!(registry.get(first.id).is_none());

        generator.release_all();
    }
}
