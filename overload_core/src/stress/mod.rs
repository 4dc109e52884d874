//! Stress generators: workloads that consume real resources on purpose
//!
//! All three generators follow one pattern: validate and clamp the request,
//! register a [`SimulationRecord`], run the workload on dedicated execution
//! units (or on the shared pool when starving it is the goal), and unregister
//! through [`RegistryGuard`], a drop guard, so the record is removed on
//! every exit path including panic.

pub mod cpu;
pub mod memory;
pub mod thread_block;

pub use cpu::{CpuStressGenerator, CpuStressParams};
pub use memory::{MemoryReleaseReport, MemoryStressGenerator, MemoryStressParams};
pub use thread_block::{ThreadBlockGenerator, ThreadBlockParams};

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::registry::record::SimulationId;
use crate::registry::SimulationRegistry;

/// Unregisters a simulation when dropped. Owning this guard is what makes a
/// workload's cleanup path guaranteed-run.
pub(crate) struct RegistryGuard {
    registry: Arc<SimulationRegistry>,
    id: SimulationId,
}

impl RegistryGuard {
    pub(crate) fn new(registry: Arc<SimulationRegistry>, id: SimulationId) -> Self {
        Self { registry, id }
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

/// Busy-spin real arithmetic until `deadline`, re-checking cancellation
/// between batches. Returns true if cancellation cut the spin short.
pub(crate) fn spin_until(deadline: Instant, cancel: &CancelToken) -> bool {
    let mut acc: u64 = 0x9e37_79b9_7f4a_7c15;
    loop {
        for _ in 0..512 {
            acc = acc
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
        }
        std::hint::black_box(acc);
        if Instant::now() >= deadline {
            return false;
        }
        if cancel.is_cancelled() {
            return true;
        }
    }
}

/// Sleep for `total` in short slices, re-checking cancellation at each wake.
/// Returns true if cancellation cut the sleep short.
pub(crate) fn sleep_cancellable(total: Duration, cancel: &CancelToken, slice: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(slice.min(deadline - now));
    }
}
