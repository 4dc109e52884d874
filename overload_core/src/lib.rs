//! # Overload Core
//!
//! The engine behind the overload stress lab: controlled resource-contention
//! workloads for exercising monitoring and alert handling against a live
//! process.
//!
//! The building blocks:
//!
//! - **Registry**: Concurrent catalog of running simulations with
//!   cancellation handles and lifecycle events
//! - **Stress generators**: CPU duty-cycle load, retained memory pressure,
//!   and worker-pool starvation
//! - **Load simulator**: Work units whose latency degrades with concurrency
//!   and that start failing once they have lived too long
//! - **Observability**: A periodic metrics sampler and a lossy non-blocking
//!   notification fan-out that stay live while the pool is starved
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use overload_core::{EngineConfig, MemoryStressParams, StressEngine};
//!
//! let engine = StressEngine::new(EngineConfig::default())?;
//! let result = engine.start_memory(MemoryStressParams { size_mb: 256 });
//! println!("{}: {}", result.id, result.message);
//! engine.release_memory();
//! engine.shutdown();
//! # Ok::<(), overload_core::EngineError>(())
//! ```

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod loadwork;
pub mod observability;
pub mod pool;
pub mod registry;
pub mod stress;

// Re-export commonly used types for easy access
pub use cancel::CancelToken;
pub use config::{
    CpuStressConfig, EngineConfig, LoadWorkConfig, MemoryStressConfig, ObservabilityConfig,
    PoolConfig, ThreadBlockConfig,
};
pub use engine::StressEngine;
pub use error::{EngineError, EngineResult};
pub use pool::SharedPool;

// Registry types
pub use registry::record::{
    SimulationId, SimulationKind, SimulationRecord, SimulationResult, SimulationStatus,
    SimulationSummary,
};
pub use registry::SimulationRegistry;

// Workload parameter and result types
pub use loadwork::{
    FailurePool, LoadReport, LoadTestParams, LoadTestStats, LoadWorkSimulator, SimulatedFailure,
    WorkOutcome, WorkUnitError, WorkUnitParams, WorkUnitReport, WorkUnitSample,
};
pub use stress::{
    CpuStressGenerator, CpuStressParams, MemoryReleaseReport, MemoryStressGenerator,
    MemoryStressParams, ThreadBlockGenerator, ThreadBlockParams,
};

// Observability surface
pub use observability::{
    Broadcaster, MetricsSnapshot, Notification, ObservabilityPlane, Subscriber, SubscriberId,
};
