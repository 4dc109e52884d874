// Load simulator behavior under real concurrency: the hold-time formula,
// batch lifecycle, cancellation, and failure injection knobs.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use overload_core::{
    CancelToken, EngineConfig, LoadTestParams, StressEngine, WorkUnitError, WorkUnitParams,
};

mod common;
use common::{minimal_engine, wait_until};

#[test]
fn test_hold_grows_with_concurrency() {
    let mut config = EngineConfig::minimal();
    config.load.baseline_delay_ms = 100;
    config.load.soft_limit = 1;
    config.load.degradation_step_ms = 50;
    let engine = Arc::new(StressEngine::new(config).unwrap());

    let barrier = Arc::new(Barrier::new(3));
    let mut handles = Vec::new();
    for _ in 0..3 {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            engine
                .run_work_unit(
                    WorkUnitParams {
                        buffer_kb: 8,
                        burn_ms: 1,
                    },
                    &CancelToken::new(),
                )
                .unwrap()
        }));
    }
    let mut reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    reports.sort_by_key(|r| r.concurrent_at_start);

    for report in &reports {
        let expected = engine
            .config()
            .load
            .held_duration_ms(report.concurrent_at_start);
        assert_eq!(
            report.held_target_ms, expected,
            "hold must follow the degradation formula"
        );
        assert!(report.elapsed_ms >= report.held_target_ms);
    }
    // the barrier overlaps the arrivals, so later units see degraded holds
    assert!(
        reports[2].concurrent_at_start >= 2,
        "units started together should observe each other"
    );
    assert!(reports[2].held_target_ms > reports[0].held_target_ms);

    engine.shutdown();
}

#[test]
fn test_batch_drains_and_counts() {
    let engine = minimal_engine();

    let result = engine.start_load_test(LoadTestParams {
        units: 6,
        unit: WorkUnitParams {
            buffer_kb: 8,
            burn_ms: 1,
        },
    });
    assert!(result.is_started());

    assert!(
        wait_until(Duration::from_secs(15), || engine.count_active() == 0),
        "batch record should retire once all units finish"
    );
    assert!(wait_until(Duration::from_secs(5), || {
        engine.load_stats().completed_total == 6
    }));
    let stats = engine.load_stats();
    assert_eq!(stats.failed_total, 0);
    assert_eq!(stats.in_flight, 0);

    engine.shutdown();
}

#[test]
fn test_cancelled_batch_stops_early() {
    let mut config = EngineConfig::minimal();
    config.load.baseline_delay_ms = 5_000;
    let engine = StressEngine::new(config).unwrap();

    let result = engine.start_load_test(LoadTestParams {
        units: 4,
        unit: WorkUnitParams::default(),
    });
    assert!(result.is_started());
    assert!(engine.stop(result.id));

    assert!(
        wait_until(Duration::from_secs(5), || engine.count_active() == 0),
        "cancelled batch should retire long before the 5 s holds"
    );
    let stats = engine.load_stats();
    assert_eq!(stats.completed_total, 0, "no cancelled unit counts as done");
    assert_eq!(stats.failed_total, 0, "cancellation is not failure");

    engine.shutdown();
}

#[test]
fn test_armed_injection_fails_units() {
    let mut config = EngineConfig::minimal();
    config.load.failure_threshold_ms = 0;
    config.load.failure_probability = 1.0;
    let engine = StressEngine::new(config).unwrap();

    let err = engine
        .run_work_unit(
            WorkUnitParams {
                buffer_kb: 4,
                burn_ms: 1,
            },
            &CancelToken::new(),
        )
        .unwrap_err();
    assert!(matches!(err, WorkUnitError::Injected(_)));
    assert_eq!(engine.load_stats().failed_total, 1);
    assert_eq!(engine.load_stats().in_flight, 0, "slot released on failure");

    engine.shutdown();
}
