//! SQLite implementation of the LearningEngineTaskRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{LearningEngineTask, LearningEngineTaskStatus, LearningEngineTaskType, TaskPriority};
use crate::domain::ports::LearningEngineTaskRepository;

use super::{format_datetime, parse_datetime, parse_optional_datetime, parse_uuid, placeholders};

#[derive(Clone)]
pub struct SqliteLearningEngineTaskRepository {
    pool: SqlitePool,
}

impl SqliteLearningEngineTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_with<'e, E>(executor: E, task: &LearningEngineTask) -> DomainResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"INSERT INTO learning_engine_tasks (uuid, verification_task_id, account_id, analysis_type,
               task_priority, task_status, analysis_start_time, analysis_end_time, test_data_url,
               control_data_url, analysis_save_url, failure_url, exception, picked_at, created_at, last_updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
        )
        .bind(task.uuid.to_string())
        .bind(&task.verification_task_id)
        .bind(&task.account_id)
        .bind(task.analysis_type.as_str())
        .bind(task.task_priority.as_i64())
        .bind(task.task_status.as_str())
        .bind(format_datetime(task.analysis_start_time))
        .bind(format_datetime(task.analysis_end_time))
        .bind(&task.test_data_url)
        .bind(&task.control_data_url)
        .bind(&task.analysis_save_url)
        .bind(&task.failure_url)
        .bind(&task.exception)
        .bind(task.picked_at.map(format_datetime))
        .bind(format_datetime(task.created_at))
        .bind(format_datetime(task.last_updated_at))
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LearningEngineTaskRepository for SqliteLearningEngineTaskRepository {
    async fn insert(&self, task: &LearningEngineTask) -> DomainResult<()> {
        Self::insert_with(&self.pool, task).await
    }

    async fn insert_batch(&self, tasks: &[LearningEngineTask]) -> DomainResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for task in tasks {
            Self::insert_with(&mut *tx, task).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, uuid: Uuid) -> DomainResult<Option<LearningEngineTask>> {
        let row: Option<LearningEngineTaskRow> = sqlx::query_as(
            "SELECT * FROM learning_engine_tasks WHERE uuid = ?"
        )
        .bind(uuid.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_many(&self, uuids: &[Uuid]) -> DomainResult<Vec<LearningEngineTask>> {
        if uuids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT * FROM learning_engine_tasks WHERE uuid IN ({})",
            placeholders(uuids.len())
        );
        let mut q = sqlx::query_as::<_, LearningEngineTaskRow>(&query);
        for uuid in uuids {
            q = q.bind(uuid.to_string());
        }
        let rows = q.fetch_all(&self.pool).await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn claim_next(
        &self,
        type_filter: Option<&[LearningEngineTaskType]>,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<LearningEngineTask>> {
        let type_clause = match type_filter {
            Some(types) if !types.is_empty() => {
                format!(" AND analysis_type IN ({})", placeholders(types.len()))
            }
            _ => String::new(),
        };

        // One statement: the candidate is re-checked as QUEUED inside the
        // same write, so a concurrent claimer sees no row.
        let query = format!(
            r#"UPDATE learning_engine_tasks
               SET task_status = 'RUNNING', picked_at = ?, last_updated_at = ?
               WHERE uuid = (
                   SELECT uuid FROM learning_engine_tasks
                   WHERE task_status = 'QUEUED'{type_clause}
                   ORDER BY task_priority, created_at, rowid
                   LIMIT 1
               ) AND task_status = 'QUEUED'
               RETURNING *"#
        );

        let now_str = format_datetime(now);
        let mut q = sqlx::query_as::<_, LearningEngineTaskRow>(&query)
            .bind(now_str.clone())
            .bind(now_str);
        if let Some(types) = type_filter {
            for analysis_type in types {
                q = q.bind(analysis_type.as_str());
            }
        }

        let row = q.fetch_optional(&self.pool).await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn finish_running(
        &self,
        uuid: Uuid,
        status: LearningEngineTaskStatus,
        exception: Option<&str>,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<LearningEngineTask>> {
        if !LearningEngineTaskStatus::Running.can_transition_to(status) {
            return Err(DomainError::InvalidStateTransition {
                from: LearningEngineTaskStatus::Running.as_str().to_string(),
                to: status.as_str().to_string(),
                reason: "learning engine tasks only finish from RUNNING".to_string(),
            });
        }

        let row: Option<LearningEngineTaskRow> = sqlx::query_as(
            r#"UPDATE learning_engine_tasks
               SET task_status = ?, exception = ?, last_updated_at = ?
               WHERE uuid = ? AND task_status = 'RUNNING'
               RETURNING *"#
        )
        .bind(status.as_str())
        .bind(exception)
        .bind(format_datetime(now))
        .bind(uuid.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn reap_stale_running(
        &self,
        uuids: Option<&[Uuid]>,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<u64> {
        let id_clause = match uuids {
            Some([]) => return Ok(0),
            Some(ids) => format!(" AND uuid IN ({})", placeholders(ids.len())),
            None => String::new(),
        };
        let query = format!(
            r#"UPDATE learning_engine_tasks
               SET task_status = 'TIMEOUT', last_updated_at = ?
               WHERE task_status = 'RUNNING' AND last_updated_at < ?{id_clause}"#
        );

        let mut q = sqlx::query(&query)
            .bind(format_datetime(now))
            .bind(format_datetime(cutoff));
        if let Some(ids) = uuids {
            for id in ids {
                q = q.bind(id.to_string());
            }
        }

        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn fail_unfinished(
        &self,
        uuids: &[Uuid],
        exception: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<u64> {
        if uuids.is_empty() {
            return Ok(0);
        }
        let query = format!(
            r#"UPDATE learning_engine_tasks
               SET task_status = 'FAILED', exception = ?, last_updated_at = ?
               WHERE task_status IN ('QUEUED', 'RUNNING') AND uuid IN ({})"#,
            placeholders(uuids.len())
        );

        let mut q = sqlx::query(&query)
            .bind(exception)
            .bind(format_datetime(now));
        for id in uuids {
            q = q.bind(id.to_string());
        }

        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn count_by_status(&self) -> DomainResult<HashMap<LearningEngineTaskStatus, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT task_status, COUNT(*) FROM learning_engine_tasks GROUP BY task_status"
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for (status_str, count) in rows {
            if let Some(status) = LearningEngineTaskStatus::from_str(&status_str) {
                counts.insert(status, u64::try_from(count).unwrap_or(0));
            }
        }
        Ok(counts)
    }
}

#[derive(sqlx::FromRow)]
struct LearningEngineTaskRow {
    uuid: String,
    verification_task_id: String,
    account_id: String,
    analysis_type: String,
    task_priority: i64,
    task_status: String,
    analysis_start_time: String,
    analysis_end_time: String,
    test_data_url: Option<String>,
    control_data_url: Option<String>,
    analysis_save_url: Option<String>,
    failure_url: Option<String>,
    exception: Option<String>,
    picked_at: Option<String>,
    created_at: String,
    last_updated_at: String,
}

impl TryFrom<LearningEngineTaskRow> for LearningEngineTask {
    type Error = DomainError;

    fn try_from(row: LearningEngineTaskRow) -> Result<Self, Self::Error> {
        let analysis_type = LearningEngineTaskType::from_str(&row.analysis_type)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid analysis type: {}", row.analysis_type)))?;
        let task_priority = TaskPriority::from_i64(row.task_priority)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid priority: {}", row.task_priority)))?;
        let task_status = LearningEngineTaskStatus::from_str(&row.task_status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.task_status)))?;

        Ok(LearningEngineTask {
            uuid: parse_uuid(&row.uuid)?,
            verification_task_id: row.verification_task_id,
            account_id: row.account_id,
            analysis_type,
            task_priority,
            task_status,
            analysis_start_time: parse_datetime(&row.analysis_start_time)?,
            analysis_end_time: parse_datetime(&row.analysis_end_time)?,
            test_data_url: row.test_data_url,
            control_data_url: row.control_data_url,
            analysis_save_url: row.analysis_save_url,
            failure_url: row.failure_url,
            exception: row.exception,
            picked_at: parse_optional_datetime(row.picked_at)?,
            created_at: parse_datetime(&row.created_at)?,
            last_updated_at: parse_datetime(&row.last_updated_at)?,
        })
    }
}
