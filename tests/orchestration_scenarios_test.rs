//! End-to-end orchestration scenarios over an in-memory database.

mod helpers;

use chrono::Duration;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use helpers::{harness, harness_with, t0, window, window_ago, CountingAnalyzer, SwitchInspector};
use vigil::domain::models::{
    AnalysisStatus, Config, DataSourceKind, ExecutionStatus, LearningEngineTaskStatus,
    LearningEngineTaskType, OrchestratorStatus, StateType, VerificationStatus, VerificationTask,
    VerificationTaskType,
};
use vigil::domain::ports::{NeverFailFast, NullSliAnalyzer};

#[tokio::test]
async fn first_window_starts_immediately() {
    let h = harness().await;
    h.register_type("vt-live", VerificationTaskType::LiveMonitoring).await;

    h.queue(window("vt-live", 0, 5)).await;

    let orchestrator = h.orchestrator("vt-live").await;
    assert_eq!(orchestrator.status, OrchestratorStatus::Running);
    assert_eq!(orchestrator.backlog_len(), 0);

    let running = h
        .engine
        .state_machines
        .find_running("vt-live")
        .await
        .unwrap()
        .expect("machine should be running");
    assert_eq!(running.status, AnalysisStatus::Running);
    assert_eq!(running.current_state.state_type, StateType::ServiceGuardLogCluster);
    assert_eq!(running.current_state.status, AnalysisStatus::Running);
    // One clustering task per minute of the window.
    assert_eq!(running.current_state.worker_task_ids.len(), 5);
}

#[tokio::test]
async fn consecutive_windows_build_a_backlog() {
    let h = harness().await;
    h.register_type("vt-live", VerificationTaskType::LiveMonitoring).await;

    for i in 0..6 {
        h.queue(window("vt-live", i * 5, 5)).await;
    }

    let orchestrators = h.engine.orchestration.list_orchestrators(None).await.unwrap();
    assert_eq!(orchestrators.len(), 1);
    assert_eq!(orchestrators[0].status, OrchestratorStatus::Running);
    assert_eq!(orchestrators[0].backlog_len(), 5);
}

#[tokio::test]
async fn deployment_failing_three_times_terminates_the_entity() {
    let h = harness().await;
    h.register(
        VerificationTask::new("vt-deploy", "acct", VerificationTaskType::Deployment, t0())
            .with_job_instance("job-7"),
    )
    .await;
    h.queue(window("vt-deploy", 0, 5)).await;
    h.queue(window("vt-deploy", 5, 5)).await;

    // Attempt 1 fails, retry after 60s.
    assert_eq!(h.fail_all().await, 1);
    h.tick("vt-deploy").await;
    let machine = h.engine.state_machines.find_running("vt-deploy").await.unwrap().unwrap();
    assert_eq!(machine.current_state.status, AnalysisStatus::Retry);
    assert_eq!(machine.next_attempt_time, Some(t0() + Duration::seconds(60)));

    // Not due yet: nothing is dispatched.
    h.clock.advance(Duration::seconds(30));
    h.tick("vt-deploy").await;
    assert_eq!(h.fail_all().await, 0);

    // Attempt 2 fails, retry after a further 120s.
    h.clock.advance(Duration::seconds(30));
    h.tick("vt-deploy").await;
    assert_eq!(h.fail_all().await, 1);
    h.tick("vt-deploy").await;
    let machine = h.engine.state_machines.find_running("vt-deploy").await.unwrap().unwrap();
    assert_eq!(machine.current_state.retry_count, 2);
    assert_eq!(
        machine.next_attempt_time,
        Some(t0() + Duration::seconds(60) + Duration::seconds(120))
    );

    // Attempt 3 fails: out of retries.
    h.clock.advance(Duration::seconds(120));
    h.tick("vt-deploy").await;
    assert_eq!(h.fail_all().await, 1);
    let orchestrator = h.tick("vt-deploy").await;

    assert_eq!(orchestrator.status, OrchestratorStatus::Terminated);
    assert_eq!(orchestrator.backlog_len(), 0);

    let machines = h.engine.state_machines.list_state_machines("vt-deploy").await.unwrap();
    assert_eq!(machines.len(), 2);
    assert_eq!(machines[0].status, AnalysisStatus::Failed);
    assert_eq!(machines[1].status, AnalysisStatus::Terminated);
    assert!(h.engine.state_machines.find_running("vt-deploy").await.unwrap().is_none());

    let job = h.engine.job_instances.get("job-7").await.unwrap().unwrap();
    assert_eq!(job.execution_status, ExecutionStatus::Failed);
    assert_eq!(job.verification_status, Some(VerificationStatus::Error));

    // No fourth attempt, and later windows are dropped.
    h.clock.advance(Duration::minutes(30));
    h.tick("vt-deploy").await;
    h.queue(window("vt-deploy", 10, 5)).await;
    assert_eq!(h.fail_all().await, 0);
    assert_eq!(h.orchestrator("vt-deploy").await.backlog_len(), 0);
}

#[tokio::test]
async fn live_monitoring_timeouts_ignore_the_window_and_move_on() {
    let h = harness().await;
    h.register_type("vt-live", VerificationTaskType::LiveMonitoring).await;
    h.queue(window("vt-live", 0, 1)).await;
    h.queue(window("vt-live", 1, 1)).await;
    let first = h.engine.state_machines.find_running("vt-live").await.unwrap().unwrap();

    let delays = [1, 2];
    for attempt in 0..3 {
        let claimed = h.engine.tasks.get_next_analysis_task(None).await.unwrap().unwrap();
        assert_eq!(claimed.analysis_type, LearningEngineTaskType::LogCluster);

        // The worker goes silent.
        h.clock.advance(Duration::minutes(11));
        h.tick("vt-live").await;
        let task = h.engine.tasks.get_task(claimed.uuid).await.unwrap().unwrap();
        assert_eq!(task.task_status, LearningEngineTaskStatus::Timeout);
        assert!(task.exception.is_none());

        if let Some(minutes) = delays.get(attempt) {
            h.clock.advance(Duration::minutes(*minutes));
            h.tick("vt-live").await;
        }
    }

    let machines = h.engine.state_machines.list_state_machines("vt-live").await.unwrap();
    let first = machines.iter().find(|m| m.uuid == first.uuid).unwrap();
    assert_eq!(first.status, AnalysisStatus::Ignored);
    assert_eq!(first.current_state.retry_count, 2);

    let orchestrator = h.orchestrator("vt-live").await;
    assert_eq!(orchestrator.status, OrchestratorStatus::Running);
    assert_eq!(orchestrator.backlog_len(), 0);
    let running = h.engine.state_machines.find_running("vt-live").await.unwrap().unwrap();
    assert_eq!(running.analysis_start_time, window("vt-live", 1, 1).start_time.unwrap());
}

#[tokio::test]
async fn waiting_is_reached_once_and_is_idempotent() {
    let h = harness().await;
    h.register_type("vt-sli", VerificationTaskType::Sli).await;
    h.queue(window("vt-sli", 0, 5)).await;

    let waiting = h.tick("vt-sli").await;
    assert_eq!(waiting.status, OrchestratorStatus::Waiting);

    for _ in 0..3 {
        let again = h.tick("vt-sli").await;
        assert_eq!(again, waiting);
    }

    // A new window wakes it up.
    h.queue(window("vt-sli", 5, 5)).await;
    assert_eq!(h.orchestrator("vt-sli").await.status, OrchestratorStatus::Running);
}

#[tokio::test]
async fn stale_backlog_is_skipped_in_bounded_batches() {
    let analyzer = Arc::new(CountingAnalyzer::default());
    let h = harness_with(Config::default(), analyzer.clone(), Arc::new(NeverFailFast)).await;
    h.register_type("vt-sli", VerificationTaskType::Sli).await;

    h.queue(window("vt-sli", 0, 5)).await;
    for i in 0..110 {
        // Every one of these ended well over three hours ago.
        h.queue(window_ago("vt-sli", 24 * 60 - i, 1)).await;
    }
    assert_eq!(h.orchestrator("vt-sli").await.backlog_len(), 110);

    let orchestrator = h.tick("vt-sli").await;
    assert_eq!(orchestrator.status, OrchestratorStatus::Running);
    assert_eq!(orchestrator.backlog_len(), 10);

    let orchestrator = h.tick("vt-sli").await;
    assert_eq!(orchestrator.status, OrchestratorStatus::Waiting);
    assert_eq!(orchestrator.backlog_len(), 0);

    let machines = h.engine.state_machines.list_state_machines("vt-sli").await.unwrap();
    let ignored = machines.iter().filter(|m| m.status == AnalysisStatus::Ignored).count();
    assert_eq!(ignored, 110);
    // Only the fresh window was ever analysed.
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fail_fast_deployment_marks_verification_failed() {
    let inspector = Arc::new(SwitchInspector::default());
    let h = harness_with(Config::default(), Arc::new(NullSliAnalyzer), inspector.clone()).await;
    h.register(
        VerificationTask::new("vt-deploy", "acct", VerificationTaskType::Deployment, t0())
            .with_data_kind(DataSourceKind::Metric)
            .with_job_instance("job-9"),
    )
    .await;
    h.queue(window("vt-deploy", 0, 5)).await;
    h.queue(window("vt-deploy", 5, 5)).await;

    // Host sampling finishes and hands over to time-series analysis.
    assert_eq!(h.complete_all().await, 1);
    h.tick("vt-deploy").await;
    let machine = h.engine.state_machines.find_running("vt-deploy").await.unwrap().unwrap();
    assert_eq!(machine.current_state.state_type, StateType::DeploymentTimeSeriesAnalysis);
    assert_eq!(machine.completed_states.len(), 1);

    inspector.fail.store(true, Ordering::SeqCst);
    assert_eq!(h.complete_all().await, 1);
    let orchestrator = h.tick("vt-deploy").await;

    assert_eq!(orchestrator.status, OrchestratorStatus::Terminated);
    let machines = h.engine.state_machines.list_state_machines("vt-deploy").await.unwrap();
    assert!(machines.iter().all(|m| m.status == AnalysisStatus::Terminated));

    let job = h.engine.job_instances.get("job-9").await.unwrap().unwrap();
    assert_eq!(job.execution_status, ExecutionStatus::Success);
    assert_eq!(job.verification_status, Some(VerificationStatus::VerificationFailed));
}

#[tokio::test]
async fn sli_failure_is_retried_then_succeeds() {
    let analyzer = Arc::new(CountingAnalyzer::failing(1));
    let h = harness_with(Config::default(), analyzer.clone(), Arc::new(NeverFailFast)).await;
    h.register_type("vt-sli", VerificationTaskType::Sli).await;
    h.queue(window("vt-sli", 0, 5)).await;

    // The synchronous run failed at initiation; this tick schedules a retry.
    let orchestrator = h.tick("vt-sli").await;
    assert_eq!(orchestrator.status, OrchestratorStatus::Running);
    let machine = h.engine.state_machines.find_running("vt-sli").await.unwrap().unwrap();
    assert_eq!(machine.current_state.status, AnalysisStatus::Retry);

    h.clock.advance(Duration::seconds(60));
    h.tick("vt-sli").await;
    let orchestrator = h.tick("vt-sli").await;
    assert_eq!(orchestrator.status, OrchestratorStatus::Waiting);

    let machines = h.engine.state_machines.list_state_machines("vt-sli").await.unwrap();
    assert_eq!(machines[0].status, AnalysisStatus::Success);
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn deployment_log_pipeline_runs_every_stage() {
    let mut config = Config::default();
    config.features.deployment_log_feedback = true;
    let h = harness_with(config, Arc::new(NullSliAnalyzer), Arc::new(NeverFailFast)).await;
    h.register(
        VerificationTask::new("vt-deploy", "acct", VerificationTaskType::Deployment, t0())
            .with_deployment_window(t0() - Duration::minutes(60), t0() - Duration::minutes(25)),
    )
    .await;
    h.queue(window("vt-deploy", 0, 5)).await;

    let mut stages = vec![];
    for _ in 0..4 {
        let machine = h.engine.state_machines.find_running("vt-deploy").await.unwrap().unwrap();
        stages.push(machine.current_state.state_type);
        assert_eq!(h.complete_all().await, 1);
        h.tick("vt-deploy").await;
    }

    assert_eq!(
        stages,
        vec![
            StateType::DeploymentLogHostSampling,
            StateType::DeploymentLogCluster,
            StateType::DeploymentLogAnalysis,
            StateType::DeploymentLogFeedback,
        ]
    );
    assert_eq!(h.orchestrator("vt-deploy").await.status, OrchestratorStatus::Completed);
}

#[tokio::test]
async fn pre_deployment_log_window_only_builds_baseline_clusters() {
    let h = harness().await;
    // The window ends exactly when the deployment starts.
    h.register(
        VerificationTask::new("vt-deploy", "acct", VerificationTaskType::Deployment, t0())
            .with_deployment_window(t0() - Duration::minutes(25), t0()),
    )
    .await;
    h.queue(window("vt-deploy", 0, 5)).await;

    assert_eq!(h.complete_all().await, 1);
    h.tick("vt-deploy").await;
    let machine = h.engine.state_machines.find_running("vt-deploy").await.unwrap().unwrap();
    assert_eq!(machine.current_state.state_type, StateType::PreDeploymentLogCluster);
    let worker = h
        .engine
        .tasks
        .get_task(machine.current_state.worker_task_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(worker.analysis_type, LearningEngineTaskType::LogCluster);

    assert_eq!(h.complete_all().await, 1);
    let orchestrator = h.tick("vt-deploy").await;
    // Baseline windows never cover the deployment end.
    assert_eq!(orchestrator.status, OrchestratorStatus::Waiting);

    let machines = h.engine.state_machines.list_state_machines("vt-deploy").await.unwrap();
    assert_eq!(machines.len(), 1);
    assert_eq!(machines[0].status, AnalysisStatus::Success);
    assert_eq!(machines[0].current_state.state_type, StateType::PreDeploymentLogCluster);
    assert_eq!(machines[0].current_state.status, AnalysisStatus::Success);
    let completed: Vec<_> = machines[0].completed_states.iter().map(|s| s.state_type).collect();
    assert_eq!(completed, vec![StateType::DeploymentLogHostSampling]);
    assert_eq!(h.complete_all().await, 0);
}

#[tokio::test]
async fn log_analysis_is_the_last_stage_without_feedback() {
    let h = harness().await;
    h.register(
        VerificationTask::new("vt-deploy", "acct", VerificationTaskType::Deployment, t0())
            .with_deployment_window(t0() - Duration::minutes(60), t0() - Duration::minutes(25)),
    )
    .await;
    h.queue(window("vt-deploy", 0, 5)).await;

    for _ in 0..3 {
        assert_eq!(h.complete_all().await, 1);
        h.tick("vt-deploy").await;
    }

    assert_eq!(h.orchestrator("vt-deploy").await.status, OrchestratorStatus::Completed);
    let machines = h.engine.state_machines.list_state_machines("vt-deploy").await.unwrap();
    assert_eq!(machines[0].status, AnalysisStatus::Success);
    assert_eq!(machines[0].current_state.state_type, StateType::DeploymentLogAnalysis);
    let completed: Vec<_> = machines[0].completed_states.iter().map(|s| s.state_type).collect();
    assert_eq!(
        completed,
        vec![StateType::DeploymentLogHostSampling, StateType::DeploymentLogCluster]
    );
    // No feedback task was ever queued.
    assert_eq!(h.complete_all().await, 0);
    let counts = h.engine.tasks.count_by_status().await.unwrap();
    assert_eq!(counts.get(&LearningEngineTaskStatus::Success), Some(&3));
    assert_eq!(counts.values().sum::<u64>(), 3);
}

#[tokio::test]
async fn retried_stage_leaves_no_claimable_workers_behind() {
    let h = harness().await;
    h.register_type("vt-live", VerificationTaskType::LiveMonitoring).await;
    h.queue(window("vt-live", 0, 3)).await;
    let first = h.engine.state_machines.find_running("vt-live").await.unwrap().unwrap();
    let old_ids = first.current_state.worker_task_ids.clone();
    assert_eq!(old_ids.len(), 3);

    let claimed = h.engine.tasks.get_next_analysis_task(None).await.unwrap().unwrap();
    h.engine.tasks.mark_failure(claimed.uuid, "worker crashed").await.unwrap();
    h.tick("vt-live").await;

    // The failed attempt's siblings are closed with it.
    for id in old_ids.iter().filter(|id| **id != claimed.uuid) {
        let task = h.engine.tasks.get_task(*id).await.unwrap().unwrap();
        assert_eq!(task.task_status, LearningEngineTaskStatus::Failed);
        assert_eq!(task.exception.as_deref(), Some("sibling worker failed"));
    }
    assert!(h.engine.tasks.get_next_analysis_task(None).await.unwrap().is_none());

    h.clock.advance(Duration::seconds(60));
    h.tick("vt-live").await;
    let rerun = h.engine.state_machines.find_running("vt-live").await.unwrap().unwrap();
    let mut new_ids = rerun.current_state.worker_task_ids.clone();
    assert_eq!(new_ids.len(), 3);
    assert!(new_ids.iter().all(|id| !old_ids.contains(id)));

    let counts = h.engine.tasks.count_by_status().await.unwrap();
    assert_eq!(counts.get(&LearningEngineTaskStatus::Queued), Some(&3));
    let mut claimed_ids = vec![];
    while let Some(task) = h.engine.tasks.get_next_analysis_task(None).await.unwrap() {
        claimed_ids.push(task.uuid);
    }
    claimed_ids.sort();
    new_ids.sort();
    assert_eq!(claimed_ids, new_ids);
}
