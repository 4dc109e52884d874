//! # Overload - Resource-Contention Stress Lab
//!
//! Overload drives a process into controlled distress: pegged CPUs, retained
//! memory, starved worker pools, and request latency that collapses under
//! concurrency. Point your monitoring at it and watch how the alerts behave.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use overload::prelude::*;
//!
//! let engine = StressEngine::new(EngineConfig::default())?;
//!
//! engine.start_cpu(CpuStressParams {
//!     duration_secs: 30,
//!     target_percent: 75,
//! });
//! engine.start_memory(MemoryStressParams { size_mb: 512 });
//!
//! // ... observe ...
//!
//! engine.cancel_all();
//! engine.shutdown();
//! # Ok::<(), EngineError>(())
//! ```
//!
//! ## Features
//!
//! - **Per-core CPU duty cycling** with staggered windows
//! - **Cumulative memory retention** with optional ceiling and forced reclaim
//! - **Worker-pool starvation** via synchronous blocking
//! - **Concurrency-degraded load simulation** with injected failures
//! - **Lossy, starvation-immune observability** built in

// Re-export the whole engine crate
pub use overload_core::{self, *};

// Re-export serde and log at crate root for subscriber and config code
pub use log;
pub use serde;

/// The overload prelude - everything you need to get started
///
/// Just add `use overload::prelude::*;`.
pub mod prelude {
    // ============================================
    // Engine & Configuration
    // ============================================
    pub use overload_core::config::{
        CpuStressConfig, EngineConfig, LoadWorkConfig, MemoryStressConfig, ObservabilityConfig,
        PoolConfig, ThreadBlockConfig,
    };
    pub use overload_core::engine::StressEngine;

    // ============================================
    // Simulation Registry
    // ============================================
    pub use overload_core::registry::record::{
        SimulationId, SimulationKind, SimulationResult, SimulationStatus, SimulationSummary,
    };
    pub use overload_core::registry::SimulationRegistry;

    // ============================================
    // Workload Parameters
    // ============================================
    pub use overload_core::loadwork::{LoadTestParams, WorkUnitParams};
    pub use overload_core::stress::{CpuStressParams, MemoryStressParams, ThreadBlockParams};

    // ============================================
    // Load Simulation Results
    // ============================================
    pub use overload_core::loadwork::{
        LoadReport, LoadTestStats, SimulatedFailure, WorkOutcome, WorkUnitError, WorkUnitReport,
        WorkUnitSample,
    };

    // ============================================
    // Observability
    // ============================================
    pub use overload_core::observability::{
        MetricsSnapshot, Notification, Subscriber, SubscriberId,
    };

    // ============================================
    // Cancellation & Memory Release
    // ============================================
    pub use overload_core::cancel::CancelToken;
    pub use overload_core::stress::MemoryReleaseReport;

    // ============================================
    // Error Types
    // ============================================
    pub use overload_core::error::{EngineError, EngineResult};

    // ============================================
    // Common Std Types
    // ============================================
    pub use std::sync::Arc;
    pub use std::time::{Duration, Instant};

    // ============================================
    // Common Traits
    // ============================================
    pub use serde::{Deserialize, Serialize};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get overload version
pub fn version() -> &'static str {
    VERSION
}
