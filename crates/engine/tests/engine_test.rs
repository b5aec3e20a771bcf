//! End-to-end tests for the conversion engine against the simulated backend
//!
//! All timing tests run with a paused clock, so latencies are exact and the
//! suite runs instantly.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use renderpool_engine::error::AllocatorError;
use renderpool_engine::prelude::*;
use renderpool_engine::sim::SimCounters;

fn engine(
    strategy: StrategyKind,
    workers: usize,
    timeout_ms: u64,
    behavior: SimBehavior,
) -> (Arc<Engine>, SimLauncher, Arc<SimCounters>) {
    let launcher = SimLauncher::new(behavior);
    let counters = launcher.counters();
    let config = EngineConfig::new(strategy)
        .with_number_of_workers(workers)
        .with_timeout(Duration::from_millis(timeout_ms));
    let engine = Engine::new(config, Arc::new(launcher.clone())).unwrap();
    (Arc::new(engine), launcher, counters)
}

fn latency(ms: u64) -> SimBehavior {
    SimBehavior::default().with_render_latency(Duration::from_millis(ms))
}

/// Run `tasks` concurrently, returning each result with its completion time
async fn run_all(
    engine: &Arc<Engine>,
    tasks: Vec<ConversionTask>,
) -> Vec<(Result<ConversionOutput, ConversionError>, Duration)> {
    let start = Instant::now();
    let handles: Vec<_> = tasks
        .into_iter()
        .map(|task| {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                let result = engine.execute(task).await;
                (result, start.elapsed())
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

// =============================================================================
// Pool sizing and backpressure
// =============================================================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_two_workers_five_tasks_run_in_three_waves() {
    let (engine, _, counters) = engine(StrategyKind::ProcessPool, 2, 30_000, latency(50));

    let tasks = (0..5)
        .map(|i| ConversionTask::pdf(format!("file:///doc-{}.html", i)))
        .collect();
    let results = run_all(&engine, tasks).await;

    let finished: Vec<_> = results
        .iter()
        .map(|(result, at)| {
            assert!(result.is_ok(), "unexpected failure: {:?}", result);
            at.as_millis()
        })
        .collect();
    assert_eq!(finished, vec![50, 50, 100, 100, 150]);

    assert_eq!(counters.launches(), 2);
    assert_eq!(counters.peak_active_renders(), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_busy_workers_never_exceed_pool_size() {
    for strategy in [StrategyKind::ProcessPool, StrategyKind::PagePool] {
        let (engine, _, counters) = engine(strategy, 3, 30_000, latency(20));

        let tasks = (0..12)
            .map(|i| ConversionTask::pdf(format!("file:///doc-{}.html", i)))
            .collect();
        let sampler = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let mut max_busy = 0;
                for _ in 0..100 {
                    if let Some(status) = engine.status() {
                        max_busy = max_busy.max(status.busy);
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                max_busy
            })
        };

        let results = run_all(&engine, tasks).await;
        assert!(results.iter().all(|(r, _)| r.is_ok()));
        assert!(sampler.await.unwrap() <= 3);
        assert_eq!(counters.peak_active_renders(), 3, "strategy {}", strategy);

        let status = engine.status().unwrap();
        assert_eq!(status.created, 3);
        assert_eq!(status.busy, 0);
        assert_eq!(status.waiting, 0);
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_waiting_tasks_are_served_in_arrival_order() {
    let (engine, _, _) = engine(StrategyKind::PagePool, 1, 30_000, latency(10));

    let tasks = (0..4)
        .map(|i| ConversionTask::pdf(format!("file:///doc-{}.html", i)))
        .collect();
    let results = run_all(&engine, tasks).await;

    let finished: Vec<_> = results.iter().map(|(_, at)| at.as_millis()).collect();
    assert_eq!(finished, vec![10, 20, 30, 40]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_dedicated_process_has_no_pool_limit() {
    let (engine, _, counters) = engine(StrategyKind::DedicatedProcess, 1, 30_000, latency(50));

    let tasks = (0..4)
        .map(|i| ConversionTask::pdf(format!("file:///doc-{}.html", i)))
        .collect();
    let results = run_all(&engine, tasks).await;

    assert!(results.iter().all(|(r, at)| r.is_ok() && at.as_millis() == 50));
    assert_eq!(counters.launches(), 4);
    assert_eq!(counters.browsers_closed(), 4);
    assert!(engine.status().is_none());
}

// =============================================================================
// Deadlines
// =============================================================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_timeout_answers_at_deadline_and_holds_worker_until_cleanup() {
    let (engine, launcher, _) = engine(StrategyKind::ProcessPool, 1, 10, latency(100));
    let start = Instant::now();

    let slow = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let result = engine.execute(ConversionTask::pdf("file:///slow.html")).await;
            (result, start.elapsed())
        })
    };

    // Let the slow task claim the only worker before making renders fast
    tokio::time::sleep(Duration::from_millis(1)).await;
    launcher.set_behavior(latency(1));

    let next = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let result = engine.execute(ConversionTask::pdf("file:///fast.html")).await;
            (result, start.elapsed())
        })
    };

    let (slow_result, slow_at) = slow.await.unwrap();
    let err = slow_result.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(
        err.to_string(),
        "Timeout Error: pdf generation not completed after 10ms"
    );
    assert_eq!(slow_at.as_millis(), 10);

    let (next_result, next_at) = next.await.unwrap();
    assert!(next_result.is_ok());
    // Blocked until the abandoned render finished at 100ms
    assert_eq!(next_at.as_millis(), 101);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_task_timeout_shortens_deadline() {
    let (engine, _, _) = engine(StrategyKind::PagePool, 1, 30_000, latency(100));

    let start = Instant::now();
    let err = engine
        .execute(ConversionTask::image("file:///slow.html").with_timeout(Duration::from_millis(20)))
        .await
        .unwrap_err();

    assert_eq!(start.elapsed().as_millis(), 20);
    assert!(err.to_string().contains("image generation not completed after 20ms"));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_task_timeout_never_extends_deadline() {
    let (engine, _, _) = engine(StrategyKind::PagePool, 1, 20, latency(100));

    let err = engine
        .execute(ConversionTask::pdf("file:///slow.html").with_timeout(Duration::from_secs(60)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("after 20ms"));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_worker_side_timeout_is_tagged_as_timeout() {
    let behavior = SimBehavior {
        honor_timeouts: true,
        ..latency(100)
    };
    let (engine, _, counters) = engine(StrategyKind::PagePool, 1, 30_000, behavior);

    let err = engine
        .execute(ConversionTask::pdf("file:///slow.html").with_timeout(Duration::from_millis(40)))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    // The page is recycled in the background
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(counters.pages_closed(), 1);
    assert_eq!(counters.pages_opened(), 2);
}

// =============================================================================
// Crashes and recycling
// =============================================================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_crashed_page_is_replaced() {
    let (engine, _, counters) = engine(
        StrategyKind::PagePool,
        1,
        30_000,
        latency(10).with_crash_marker("crash"),
    );

    let before = engine
        .execute(ConversionTask::pdf("file:///a.html"))
        .await
        .unwrap();

    let err = engine
        .execute(ConversionTask::pdf("file:///crash.html"))
        .await
        .unwrap_err();
    assert!(err.is_crash());
    assert_eq!(err.kind(), FailureKind::Crash);

    let after = engine
        .execute(ConversionTask::pdf("file:///a.html"))
        .await
        .unwrap();

    assert_ne!(before.content, after.content);
    assert_eq!(counters.crashes(), 1);
    assert_eq!(counters.pages_opened(), 2);
    assert_eq!(counters.pages_closed(), 1);
    // Recycling a page never relaunches the shared process
    assert_eq!(counters.launches(), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_failed_launch_does_not_poison_pool() {
    let (engine, launcher, counters) = engine(StrategyKind::ProcessPool, 1, 30_000, latency(5));
    launcher.fail_next_launches(1);

    let err = engine
        .execute(ConversionTask::pdf("file:///a.html"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConversionError::Allocation(AllocatorError::Create(WorkerError::Launch(_)))
    ));

    engine
        .execute(ConversionTask::pdf("file:///a.html"))
        .await
        .unwrap();
    assert_eq!(counters.failed_launches(), 1);
    assert_eq!(counters.launches(), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_failed_page_creation_frees_slot() {
    let (engine, launcher, counters) = engine(StrategyKind::PagePool, 1, 30_000, latency(5));
    launcher.fail_next_pages(1);

    let err = engine
        .execute(ConversionTask::pdf("file:///a.html"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ConversionError::Allocation(AllocatorError::Create(_))
    ));

    engine
        .execute(ConversionTask::pdf("file:///a.html"))
        .await
        .unwrap();
    assert_eq!(counters.launches(), 1);
    assert_eq!(counters.pages_opened(), 1);
    assert_eq!(engine.status().unwrap().busy, 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_shared_process_launch_is_coalesced() {
    let behavior = SimBehavior::default()
        .with_launch_latency(Duration::from_millis(30))
        .with_render_latency(Duration::from_millis(5));
    let (engine, _, counters) = engine(StrategyKind::PagePool, 4, 30_000, behavior);

    let tasks = (0..4)
        .map(|i| ConversionTask::pdf(format!("file:///doc-{}.html", i)))
        .collect();
    let results = run_all(&engine, tasks).await;

    assert!(results.iter().all(|(r, at)| r.is_ok() && at.as_millis() == 35));
    assert_eq!(counters.launches(), 1);
    assert_eq!(counters.pages_opened(), 4);
}

// =============================================================================
// Options
// =============================================================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_invalid_page_override_is_rejected_and_worker_reused() {
    let (engine, launcher, counters) = engine(
        StrategyKind::PagePool,
        1,
        30_000,
        latency(5).with_overrides(json!({ "mediaType": "tv" })),
    );

    let err = engine
        .execute(ConversionTask::pdf("file:///a.html"))
        .await
        .unwrap_err();
    assert!(err.is_weak());
    assert_eq!(err.kind(), FailureKind::Application);

    launcher.set_behavior(latency(5).with_overrides(json!({ "type": "jpeg", "path": "/tmp/x" })));
    let output = engine
        .execute(ConversionTask::image("file:///a.html"))
        .await
        .unwrap();
    assert_eq!(output.content_type, "jpeg");
    assert_eq!(counters.pages_opened(), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_image_defaults_to_png() {
    let (engine, _, _) = engine(StrategyKind::ProcessPool, 1, 30_000, latency(5));

    let output = engine
        .execute(ConversionTask::image("file:///a.html"))
        .await
        .unwrap();
    assert_eq!(output.content_type, "png");
    assert!(output.content.starts_with(renderpool_engine::sim::PNG_MAGIC));
}

// =============================================================================
// Shutdown
// =============================================================================

#[test_log::test(tokio::test(start_paused = true))]
async fn test_shutdown_fails_waiting_tasks() {
    let (engine, _, counters) = engine(StrategyKind::ProcessPool, 1, 30_000, latency(100));

    let running = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.execute(ConversionTask::pdf("file:///a.html")).await })
    };
    let waiting = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.execute(ConversionTask::pdf("file:///b.html")).await })
    };

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(engine.status().unwrap().waiting, 1);

    engine.shutdown().await;
    engine.shutdown().await;

    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        ConversionError::Allocation(AllocatorError::ShutDown)
    ));
    assert_eq!(counters.browsers_closed(), 1);

    let _ = running.await.unwrap();
    let err = engine
        .execute(ConversionTask::pdf("file:///c.html"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConversionError::Allocation(_)));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_page_pool_shutdown_closes_everything() {
    let (engine, _, counters) = engine(StrategyKind::PagePool, 3, 30_000, latency(5));

    let tasks = (0..3)
        .map(|i| ConversionTask::pdf(format!("file:///doc-{}.html", i)))
        .collect();
    run_all(&engine, tasks).await;

    engine.shutdown().await;
    assert_eq!(counters.pages_closed(), 3);
    assert_eq!(counters.browsers_closed(), 1);
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_invalid_configuration_is_rejected() {
    let launcher = Arc::new(SimLauncher::default());

    let config = EngineConfig::new(StrategyKind::PagePool).with_number_of_workers(0);
    assert!(matches!(
        Engine::new(config, launcher.clone()),
        Err(ConfigError::InvalidPoolSize(0))
    ));

    let config = EngineConfig::new(StrategyKind::ProcessPool).with_timeout(Duration::ZERO);
    assert!(matches!(
        Engine::new(config, launcher),
        Err(ConfigError::InvalidTimeout)
    ));

    assert!(matches!(
        "round-robin".parse::<StrategyKind>(),
        Err(ConfigError::UnknownStrategy(_))
    ));
}
