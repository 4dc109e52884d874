//! Injected failures for long-running work
//!
//! Once a work unit has been alive past the configured threshold it rolls
//! against a weighted pool of synthetic errors. The variants mimic the
//! classes of failure a degrading service actually produces, so downstream
//! handling gets exercised with realistic shapes rather than one generic
//! error string.

use rand::Rng;
use thiserror::Error;

/// A synthetic error drawn from the weighted pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulatedFailure {
    #[error("simulated timeout after {0} ms")]
    Timeout(u64),
    #[error("simulated invalid argument: {0}")]
    InvalidArgument(String),
    #[error("simulated i/o error: {0}")]
    Io(String),
    #[error("simulated arithmetic overflow")]
    ArithmeticOverflow,
    #[error("simulated out-of-memory condition")]
    OutOfMemory,
    #[error("simulated dependency outage: {0}")]
    DependencyUnavailable(String),
}

/// Why a work unit stopped before finishing its loop.
#[derive(Debug, Error)]
pub enum WorkUnitError {
    #[error("work unit cancelled")]
    Cancelled,
    #[error("work buffer allocation failed: {0}")]
    Allocation(String),
    #[error(transparent)]
    Injected(#[from] SimulatedFailure),
}

/// Unit state handed to failure constructors so messages can reference it.
#[derive(Debug, Clone, Copy)]
pub struct FailureContext {
    pub elapsed_ms: u64,
    pub concurrent: u64,
}

type FailureCtor = Box<dyn Fn(&FailureContext) -> SimulatedFailure + Send + Sync>;

/// Weighted pool of failure constructors.
pub struct FailurePool {
    entries: Vec<(u32, FailureCtor)>,
    total_weight: u32,
}

impl FailurePool {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            total_weight: 0,
        }
    }

    pub fn push<F>(&mut self, weight: u32, ctor: F)
    where
        F: Fn(&FailureContext) -> SimulatedFailure + Send + Sync + 'static,
    {
        self.total_weight = self.total_weight.saturating_add(weight);
        self.entries.push((weight, Box::new(ctor)));
    }

    /// The default mix: timeouts and flaky i/o dominate, hard resource
    /// errors stay rare.
    pub fn standard() -> Self {
        let mut pool = Self::new();
        pool.push(30, |ctx| SimulatedFailure::Timeout(ctx.elapsed_ms));
        pool.push(25, |_| SimulatedFailure::Io("connection reset by peer".into()));
        pool.push(20, |_| {
            SimulatedFailure::DependencyUnavailable("upstream service".into())
        });
        pool.push(10, |ctx| {
            SimulatedFailure::InvalidArgument(format!(
                "stale request at concurrency {}",
                ctx.concurrent
            ))
        });
        pool.push(10, |_| SimulatedFailure::ArithmeticOverflow);
        pool.push(5, |_| SimulatedFailure::OutOfMemory);
        pool
    }

    /// Draw one failure, weight-proportionally. An empty pool yields none.
    pub fn draw<R: Rng>(&self, rng: &mut R, ctx: &FailureContext) -> Option<SimulatedFailure> {
        if self.total_weight == 0 {
            return None;
        }
        let mut pick = rng.gen_range(0..self.total_weight);
        for (weight, ctor) in &self.entries {
            if pick < *weight {
                return Some(ctor(ctx));
            }
            pick -= *weight;
        }
        None
    }

    pub fn total_weight(&self) -> u32 {
        self.total_weight
    }
}

impl Default for FailurePool {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use std::mem::discriminant;

    const CTX: FailureContext = FailureContext {
        elapsed_ms: 1234,
        concurrent: 7,
    };

    #[test]
    fn test_empty_pool_never_fails() {
        let pool = FailurePool::new();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert!(pool.draw(&mut rng, &CTX).is_none());
        }
    }

    #[test]
    fn test_standard_pool_produces_every_variant() {
        let pool = FailurePool::standard();
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            if let Some(failure) = pool.draw(&mut rng, &CTX) {
                seen.insert(discriminant(&failure));
            }
        }
        assert_eq!(seen.len(), 6, "all six variants should appear");
    }

    #[test]
    fn test_timeout_carries_unit_elapsed() {
        let mut pool = FailurePool::new();
        pool.push(1, |ctx| SimulatedFailure::Timeout(ctx.elapsed_ms));
        let mut rng = StdRng::seed_from_u64(2);
        let failure = pool.draw(&mut rng, &CTX).unwrap();
        assert_eq!(failure, SimulatedFailure::Timeout(1234));
        assert!(failure.to_string().contains("1234"));
    }

    #[test]
    fn test_injected_error_displays_transparently() {
        let err: WorkUnitError = SimulatedFailure::OutOfMemory.into();
        assert!(matches!(err, WorkUnitError::Injected(_)));
        assert_eq!(err.to_string(), "simulated out-of-memory condition");
    }
}
