//! SQLite implementation of the AnalysisStateMachineRepository.

use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AnalysisState, AnalysisStateMachine, AnalysisStatus};
use crate::domain::ports::AnalysisStateMachineRepository;

use super::{conflict_or_database_error, format_datetime, parse_datetime, parse_json_or_default, parse_optional_datetime, parse_uuid};

const ENTITY: &str = "AnalysisStateMachine";

const INSERT_SQL: &str = r#"INSERT INTO analysis_state_machines (uuid, verification_task_id, account_id,
       analysis_start_time, analysis_end_time, status, current_state, completed_states,
       total_retry_count, next_attempt_time, created_at, last_updated_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#;

const UPSERT_SQL: &str = r#"INSERT INTO analysis_state_machines (uuid, verification_task_id, account_id,
       analysis_start_time, analysis_end_time, status, current_state, completed_states,
       total_retry_count, next_attempt_time, created_at, last_updated_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
       ON CONFLICT(uuid) DO UPDATE SET
           status = excluded.status,
           current_state = excluded.current_state,
           completed_states = excluded.completed_states,
           total_retry_count = excluded.total_retry_count,
           next_attempt_time = excluded.next_attempt_time,
           last_updated_at = excluded.last_updated_at"#;

#[derive(Clone)]
pub struct SqliteAnalysisStateMachineRepository {
    pool: SqlitePool,
}

impl SqliteAnalysisStateMachineRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn write<'e, E>(executor: E, sql: &str, machine: &AnalysisStateMachine) -> DomainResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let current_state_json = serde_json::to_string(&machine.current_state)?;
        let completed_json = serde_json::to_string(&machine.completed_states)?;

        sqlx::query(sql)
            .bind(machine.uuid.to_string())
            .bind(&machine.verification_task_id)
            .bind(&machine.account_id)
            .bind(format_datetime(machine.analysis_start_time))
            .bind(format_datetime(machine.analysis_end_time))
            .bind(machine.status.as_str())
            .bind(&current_state_json)
            .bind(&completed_json)
            .bind(i64::from(machine.total_retry_count))
            .bind(machine.next_attempt_time.map(format_datetime))
            .bind(format_datetime(machine.created_at))
            .bind(format_datetime(machine.last_updated_at))
            .execute(executor)
            .await
            .map_err(|e| conflict_or_database_error(e, ENTITY, &machine.verification_task_id))?;
        Ok(())
    }
}

#[async_trait]
impl AnalysisStateMachineRepository for SqliteAnalysisStateMachineRepository {
    async fn insert(&self, machine: &AnalysisStateMachine) -> DomainResult<()> {
        Self::write(&self.pool, INSERT_SQL, machine).await
    }

    async fn save(&self, machine: &AnalysisStateMachine) -> DomainResult<()> {
        Self::write(&self.pool, UPSERT_SQL, machine).await
    }

    async fn save_all(&self, machines: &[AnalysisStateMachine]) -> DomainResult<()> {
        if machines.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for machine in machines {
            Self::write(&mut *tx, UPSERT_SQL, machine).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, uuid: Uuid) -> DomainResult<Option<AnalysisStateMachine>> {
        let row: Option<StateMachineRow> = sqlx::query_as(
            "SELECT * FROM analysis_state_machines WHERE uuid = ?"
        )
        .bind(uuid.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_running(&self, verification_task_id: &str) -> DomainResult<Option<AnalysisStateMachine>> {
        let row: Option<StateMachineRow> = sqlx::query_as(
            "SELECT * FROM analysis_state_machines WHERE verification_task_id = ? AND status = ?"
        )
        .bind(verification_task_id)
        .bind(AnalysisStatus::Running.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_latest_final(&self, verification_task_id: &str) -> DomainResult<Option<AnalysisStateMachine>> {
        let row: Option<StateMachineRow> = sqlx::query_as(
            r#"SELECT * FROM analysis_state_machines
               WHERE verification_task_id = ? AND status IN (?, ?, ?, ?)
                 AND json_extract(current_state, '$.started_at') IS NOT NULL
               ORDER BY last_updated_at DESC, analysis_end_time DESC
               LIMIT 1"#
        )
        .bind(verification_task_id)
        .bind(AnalysisStatus::Success.as_str())
        .bind(AnalysisStatus::Failed.as_str())
        .bind(AnalysisStatus::Ignored.as_str())
        .bind(AnalysisStatus::Terminated.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_by_verification_task(&self, verification_task_id: &str) -> DomainResult<Vec<AnalysisStateMachine>> {
        let rows: Vec<StateMachineRow> = sqlx::query_as(
            r#"SELECT * FROM analysis_state_machines
               WHERE verification_task_id = ?
               ORDER BY analysis_start_time, created_at"#
        )
        .bind(verification_task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct StateMachineRow {
    uuid: String,
    verification_task_id: String,
    account_id: String,
    analysis_start_time: String,
    analysis_end_time: String,
    status: String,
    current_state: String,
    completed_states: Option<String>,
    total_retry_count: i64,
    next_attempt_time: Option<String>,
    created_at: String,
    last_updated_at: String,
}

impl TryFrom<StateMachineRow> for AnalysisStateMachine {
    type Error = DomainError;

    fn try_from(row: StateMachineRow) -> Result<Self, Self::Error> {
        let status = AnalysisStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        let current_state: AnalysisState = serde_json::from_str(&row.current_state)?;
        let completed_states: Vec<AnalysisState> = parse_json_or_default(row.completed_states)?;
        let total_retry_count = u32::try_from(row.total_retry_count)
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;

        Ok(AnalysisStateMachine {
            uuid: parse_uuid(&row.uuid)?,
            verification_task_id: row.verification_task_id,
            account_id: row.account_id,
            analysis_start_time: parse_datetime(&row.analysis_start_time)?,
            analysis_end_time: parse_datetime(&row.analysis_end_time)?,
            current_state,
            completed_states,
            status,
            total_retry_count,
            next_attempt_time: parse_optional_datetime(row.next_attempt_time)?,
            created_at: parse_datetime(&row.created_at)?,
            last_updated_at: parse_datetime(&row.last_updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{AnalysisInput, StateType};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn machine(vt: &str, offset_minutes: i64) -> AnalysisStateMachine {
        let start = t0() + Duration::minutes(offset_minutes);
        let end = start + Duration::minutes(5);
        AnalysisStateMachine::new(
            vt,
            "acct",
            start,
            end,
            AnalysisState::new(StateType::ServiceGuardLogCluster, AnalysisInput::new(vt, start, end)),
            t0(),
        )
    }

    async fn setup_test_repo() -> SqliteAnalysisStateMachineRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteAnalysisStateMachineRepository::new(pool)
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let repo = setup_test_repo().await;
        let mut m = machine("vt-1", 0);
        m.current_state.worker_task_ids = vec![Uuid::new_v4()];
        repo.save(&m).await.unwrap();

        let loaded = repo.get(m.uuid).await.unwrap().unwrap();
        assert_eq!(loaded, m);
    }

    #[tokio::test]
    async fn test_second_running_machine_is_a_conflict() {
        let repo = setup_test_repo().await;
        let mut first = machine("vt-1", 0);
        first.status = AnalysisStatus::Running;
        repo.save(&first).await.unwrap();

        let mut second = machine("vt-1", 5);
        second.status = AnalysisStatus::Running;
        let err = repo.save(&second).await.unwrap_err();
        assert!(err.is_conflict());

        // A different entity is unaffected.
        let mut other = machine("vt-2", 0);
        other.status = AnalysisStatus::Running;
        repo.save(&other).await.unwrap();

        // Finishing the first frees the slot.
        first.finish(AnalysisStatus::Success, t0());
        repo.save(&first).await.unwrap();
        repo.save(&second).await.unwrap();
        assert_eq!(repo.find_running("vt-1").await.unwrap().unwrap().uuid, second.uuid);
    }

    #[tokio::test]
    async fn test_insert_refuses_known_uuid() {
        let repo = setup_test_repo().await;
        let mut m = machine("vt-1", 0);
        m.status = AnalysisStatus::Running;
        repo.insert(&m).await.unwrap();

        assert!(repo.insert(&m).await.unwrap_err().is_conflict());
        let mut other = machine("vt-1", 5);
        other.status = AnalysisStatus::Running;
        assert!(repo.insert(&other).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_find_latest_final() {
        let repo = setup_test_repo().await;
        let mut done = machine("vt-1", 0);
        done.current_state.started_at = Some(t0());
        done.finish(AnalysisStatus::Success, t0() + Duration::minutes(1));
        let mut failed = machine("vt-1", 5);
        failed.current_state.started_at = Some(t0() + Duration::minutes(1));
        failed.finish(AnalysisStatus::Failed, t0() + Duration::minutes(2));
        let mut running = machine("vt-1", 10);
        running.status = AnalysisStatus::Running;
        running.current_state.started_at = Some(t0() + Duration::minutes(2));
        // Closed later but never started.
        let mut dropped = machine("vt-1", 15);
        dropped.finish(AnalysisStatus::Terminated, t0() + Duration::minutes(3));
        repo.save_all(&[done, failed.clone(), running, dropped]).await.unwrap();

        let latest = repo.find_latest_final("vt-1").await.unwrap().unwrap();
        assert_eq!(latest.uuid, failed.uuid);
        assert!(repo.find_latest_final("vt-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_orders_by_window() {
        let repo = setup_test_repo().await;
        let later = machine("vt-1", 10);
        let earlier = machine("vt-1", 0);
        repo.save(&later).await.unwrap();
        repo.save(&earlier).await.unwrap();

        let listed = repo.list_by_verification_task("vt-1").await.unwrap();
        let ids: Vec<_> = listed.iter().map(|m| m.uuid).collect();
        assert_eq!(ids, vec![earlier.uuid, later.uuid]);
    }
}
