//! Property tests for window ordering under arbitrary queue/tick interleavings.

mod helpers;

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use helpers::{harness, t0};
use vigil::domain::models::{AnalysisInput, AnalysisStatus, OrchestratorStatus, VerificationTaskType};

#[derive(Debug, Clone)]
enum Op {
    Queue { offset_minutes: i64 },
    Tick,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..120).prop_map(|offset_minutes| Op::Queue { offset_minutes }),
        Just(Op::Tick),
    ]
}

async fn running_count(pool: &sqlx::SqlitePool) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM analysis_state_machines WHERE verification_task_id = 'vt-sli' AND status = 'RUNNING'",
    )
    .fetch_one(pool)
    .await
    .unwrap()
}

/// Starts of the windows in the order they were queued and in the order they ran.
async fn play(ops: Vec<Op>) -> Result<(Vec<DateTime<Utc>>, Vec<DateTime<Utc>>), TestCaseError> {
    let h = harness().await;
    h.register_type("vt-sli", VerificationTaskType::Sli).await;

    let mut queued = Vec::new();
    let mut started: Vec<DateTime<Utc>> = Vec::new();
    let observe = |running: Option<DateTime<Utc>>, started: &mut Vec<DateTime<Utc>>| {
        if let Some(start) = running {
            if started.last() != Some(&start) {
                started.push(start);
            }
        }
    };

    for (i, op) in ops.into_iter().enumerate() {
        h.clock.advance(Duration::seconds(1));
        match op {
            Op::Queue { offset_minutes } => {
                // Distinct starts so each window is identifiable.
                let start = t0() - Duration::minutes(150)
                    + Duration::minutes(offset_minutes)
                    + Duration::seconds(i as i64);
                h.queue(AnalysisInput::new("vt-sli", start, start + Duration::minutes(5)))
                    .await;
                queued.push(start);
            }
            Op::Tick => {
                if h
                    .engine
                    .orchestration
                    .orchestrate_by_id("vt-sli")
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?
                    .is_none()
                {
                    continue;
                }
            }
        }

        prop_assert!(running_count(&h.pool).await <= 1);
        let running = h.engine.state_machines.find_running("vt-sli").await.unwrap();
        observe(running.map(|m| m.analysis_start_time), &mut started);
    }

    // Drain whatever is left.
    if !queued.is_empty() {
        for _ in 0..=queued.len() {
            let orchestrator = h.tick("vt-sli").await;
            let running = h.engine.state_machines.find_running("vt-sli").await.unwrap();
            observe(running.map(|m| m.analysis_start_time), &mut started);
            if orchestrator.status == OrchestratorStatus::Waiting {
                break;
            }
        }
        let orchestrator = h.orchestrator("vt-sli").await;
        prop_assert_eq!(orchestrator.status, OrchestratorStatus::Waiting);
        prop_assert_eq!(orchestrator.backlog_len(), 0);

        let machines = h.engine.state_machines.list_state_machines("vt-sli").await.unwrap();
        prop_assert_eq!(machines.len(), queued.len());
        prop_assert!(machines.iter().all(|m| m.status == AnalysisStatus::Success));
    }

    Ok((queued, started))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Windows run one at a time, in the order they were queued.
    #[test]
    fn prop_windows_run_in_queue_order(ops in prop::collection::vec(op(), 1..30)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (queued, started) = runtime.block_on(play(ops))?;
        prop_assert_eq!(started, queued);
    }
}
