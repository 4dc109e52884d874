//! Shared test utilities for overload_core integration tests

use std::time::{Duration, Instant};

use overload_core::{EngineConfig, StressEngine};

/// Poll `check` every 10 ms until it holds or `deadline` passes. Returns the
/// final outcome so callers can assert on it.
pub fn wait_until<F: Fn() -> bool>(deadline: Duration, check: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

/// Engine sized for CI: two pool workers, short intervals, 1 MB memory floor.
pub fn minimal_engine() -> StressEngine {
    StressEngine::new(EngineConfig::minimal()).unwrap()
}
