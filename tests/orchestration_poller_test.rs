//! Poller passes, event-driven ticks and concurrent orchestration.

mod helpers;

use chrono::Duration;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::watch;

use helpers::{harness, harness_with, window, Harness};
use vigil::adapters::sqlite::{initialize_database, PoolConfig};
use vigil::domain::models::{AnalysisStatus, Config, OrchestratorStatus, StateType, VerificationTaskType};
use vigil::domain::ports::{NeverFailFast, NullSliAnalyzer};

#[tokio::test]
async fn tick_reaps_silent_tasks_and_reports_each_orchestrator() {
    let h = harness().await;
    h.register_type("vt-sli", VerificationTaskType::Sli).await;
    h.register_type("vt-live", VerificationTaskType::LiveMonitoring).await;
    h.queue(window("vt-sli", 0, 5)).await;
    h.queue(window("vt-live", 0, 5)).await;

    // Workers claim everything and go quiet.
    let mut claimed = 0;
    while h.engine.tasks.get_next_analysis_task(None).await.unwrap().is_some() {
        claimed += 1;
    }
    assert_eq!(claimed, 5);
    h.clock.advance(Duration::minutes(11));

    let summary = h.engine.poller().tick().await.unwrap();
    assert_eq!(summary.reaped_tasks, 5);
    assert_eq!(summary.ticked, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.waiting, 1);
    assert_eq!(summary.terminated, 0);

    let live = h.engine.state_machines.find_running("vt-live").await.unwrap().unwrap();
    assert_eq!(live.current_state.status, AnalysisStatus::Retry);

    // Waiting orchestrators are left out of the next pass.
    let summary = h.engine.poller().tick().await.unwrap();
    assert_eq!(summary.ticked, 1);
    assert_eq!(summary.reaped_tasks, 0);
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let h = harness().await;
    let poller = h.engine.poller();
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(async move { poller.run(None, rx).await });
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    tx.send(true).unwrap();

    let result = tokio::time::timeout(StdDuration::from_secs(5), handle)
        .await
        .expect("poller did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn task_complete_event_ticks_the_entity() {
    let mut config = Config::default();
    config.orchestration.poll_interval_secs = 3600;
    let h = harness_with(config, Arc::new(NullSliAnalyzer), Arc::new(NeverFailFast)).await;
    h.register_type("vt-deploy", VerificationTaskType::Deployment).await;
    h.queue(window("vt-deploy", 0, 5)).await;

    let poller = h.engine.poller();
    let events = h.engine.publisher.subscribe();
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { poller.run(Some(events), rx).await });
    // Let the initial pass go by.
    tokio::time::sleep(StdDuration::from_millis(50)).await;

    assert_eq!(h.complete_all().await, 1);

    let mut stage = StateType::DeploymentLogHostSampling;
    for _ in 0..100 {
        let running = h.engine.state_machines.find_running("vt-deploy").await.unwrap().unwrap();
        stage = running.current_state.state_type;
        if stage != StateType::DeploymentLogHostSampling {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    assert_eq!(stage, StateType::DeploymentLogCluster);

    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ticks_start_each_window_once() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("vigil.db").display());
    let pool = initialize_database(
        &url,
        Some(PoolConfig {
            max_connections: 8,
            ..PoolConfig::default()
        }),
    )
    .await
    .unwrap();
    let h = Arc::new(Harness::over_pool(
        pool,
        Config::default(),
        Arc::new(NullSliAnalyzer),
        Arc::new(NeverFailFast),
    ));
    h.register_type("vt-sli", VerificationTaskType::Sli).await;
    for i in 0..10 {
        h.queue(window("vt-sli", i, 1)).await;
    }

    let tickers = (0..6).map(|_| {
        let h = h.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                h.engine.orchestration.orchestrate_by_id("vt-sli").await?;
            }
            Ok::<_, vigil::DomainError>(())
        })
    });
    for joined in join_all(tickers).await {
        joined.unwrap().unwrap();
    }

    // Settle anything the racers left behind.
    for _ in 0..11 {
        if h.tick("vt-sli").await.status == OrchestratorStatus::Waiting {
            break;
        }
    }

    let orchestrator = h.orchestrator("vt-sli").await;
    assert_eq!(orchestrator.status, OrchestratorStatus::Waiting);
    assert_eq!(orchestrator.backlog_len(), 0);

    let machines = h.engine.state_machines.list_state_machines("vt-sli").await.unwrap();
    assert_eq!(machines.len(), 10);
    assert!(machines.iter().all(|m| m.status == AnalysisStatus::Success));
}
