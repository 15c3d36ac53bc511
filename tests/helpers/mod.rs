//! Shared fixtures for integration tests.
//!
//! Each test gets its own in-memory database and a manual clock parked at
//! 2024-03-01T12:00:00Z, so retry gates and staleness are deterministic.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use vigil::adapters::sqlite::create_migrated_test_pool;
use vigil::domain::errors::{DomainError, DomainResult};
use vigil::domain::models::{
    AnalysisInput, AnalysisOrchestrator, Config, StateType, VerificationJobInstance,
    VerificationTask, VerificationTaskType,
};
use vigil::domain::ports::{
    AnalysisOutcomeInspector, ManualClock, NeverFailFast, NullSliAnalyzer, SliAnalyzer,
};
use vigil::services::{Collaborators, Engine};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub struct Harness {
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    pub pool: SqlitePool,
}

pub async fn harness() -> Harness {
    harness_with(Config::default(), Arc::new(NullSliAnalyzer), Arc::new(NeverFailFast)).await
}

pub async fn harness_with(
    config: Config,
    sli_analyzer: Arc<dyn SliAnalyzer>,
    inspector: Arc<dyn AnalysisOutcomeInspector>,
) -> Harness {
    let pool = create_migrated_test_pool()
        .await
        .expect("failed to create test database");
    Harness::over_pool(pool, config, sli_analyzer, inspector)
}

impl Harness {
    pub fn over_pool(
        pool: SqlitePool,
        config: Config,
        sli_analyzer: Arc<dyn SliAnalyzer>,
        inspector: Arc<dyn AnalysisOutcomeInspector>,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let engine = Engine::new(
            pool.clone(),
            config,
            Collaborators {
                sli_analyzer,
                inspector,
                clock: clock.clone(),
            },
        );
        Self { engine, clock, pool }
    }

    pub async fn register(&self, task: VerificationTask) {
        if let Some(job_id) = &task.verification_job_instance_id {
            self.engine
                .job_instances
                .save(&VerificationJobInstance::new(job_id.clone(), t0()))
                .await
                .expect("failed to save job instance");
        }
        self.engine
            .verification_tasks
            .save(&task)
            .await
            .expect("failed to save verification task");
    }

    pub async fn register_type(&self, id: &str, task_type: VerificationTaskType) {
        self.register(VerificationTask::new(id, "acct", task_type, t0())).await;
    }

    pub async fn queue(&self, input: AnalysisInput) {
        self.engine
            .orchestration
            .queue_analysis(input)
            .await
            .expect("queue_analysis failed");
    }

    pub async fn tick(&self, verification_task_id: &str) -> AnalysisOrchestrator {
        self.engine
            .orchestration
            .orchestrate_by_id(verification_task_id)
            .await
            .expect("orchestrate failed")
            .expect("no orchestrator")
    }

    pub async fn orchestrator(&self, verification_task_id: &str) -> AnalysisOrchestrator {
        self.engine
            .orchestration
            .get_analysis_orchestrator(verification_task_id)
            .await
            .expect("orchestrator lookup failed")
            .expect("no orchestrator")
    }

    /// Play a worker: claim every queued task and report success.
    pub async fn complete_all(&self) -> usize {
        let mut done = 0;
        while let Some(task) = self.engine.tasks.get_next_analysis_task(None).await.unwrap() {
            self.engine.tasks.mark_completed(task.uuid).await.unwrap();
            done += 1;
        }
        done
    }

    /// Play a worker: claim every queued task and report failure.
    pub async fn fail_all(&self) -> usize {
        let mut done = 0;
        while let Some(task) = self.engine.tasks.get_next_analysis_task(None).await.unwrap() {
            self.engine.tasks.mark_failure(task.uuid, "worker crashed").await.unwrap();
            done += 1;
        }
        done
    }
}

/// A recent window `[t0 - 30m + offset, +len)`.
pub fn window(verification_task_id: &str, offset_minutes: i64, len_minutes: i64) -> AnalysisInput {
    let start = t0() - Duration::minutes(30) + Duration::minutes(offset_minutes);
    AnalysisInput::new(verification_task_id, start, start + Duration::minutes(len_minutes))
}

/// A window starting `minutes_ago` before t0.
pub fn window_ago(verification_task_id: &str, minutes_ago: i64, len_minutes: i64) -> AnalysisInput {
    let start = t0() - Duration::minutes(minutes_ago);
    AnalysisInput::new(verification_task_id, start, start + Duration::minutes(len_minutes))
}

/// Inspector whose verdict is flipped by the test.
#[derive(Default)]
pub struct SwitchInspector {
    pub fail: AtomicBool,
}

#[async_trait]
impl AnalysisOutcomeInspector for SwitchInspector {
    async fn should_fail_fast(&self, _input: &AnalysisInput) -> DomainResult<bool> {
        Ok(self.fail.load(Ordering::SeqCst))
    }
}

/// SLI analyzer that counts calls and fails the first `failures` of them.
#[derive(Default)]
pub struct CountingAnalyzer {
    pub calls: AtomicUsize,
    pub failures: usize,
}

impl CountingAnalyzer {
    pub fn failing(failures: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures,
        }
    }
}

#[async_trait]
impl SliAnalyzer for CountingAnalyzer {
    async fn analyze(&self, _state_type: StateType, _input: &AnalysisInput) -> DomainResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(DomainError::ExecutionFailed("sli backend unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}
