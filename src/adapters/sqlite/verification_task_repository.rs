//! SQLite implementations of the verification task and job instance repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    DataSourceKind, ExecutionStatus, VerificationJobInstance, VerificationStatus,
    VerificationTask, VerificationTaskType,
};
use crate::domain::ports::{VerificationJobInstanceRepository, VerificationTaskRepository};

use super::{format_datetime, parse_datetime, parse_optional_datetime};

#[derive(Clone)]
pub struct SqliteVerificationTaskRepository {
    pool: SqlitePool,
}

impl SqliteVerificationTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationTaskRepository for SqliteVerificationTaskRepository {
    async fn save(&self, task: &VerificationTask) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO verification_tasks (id, account_id, task_type, data_kind,
               verification_job_instance_id, deployment_start_time, deployment_end_time, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   account_id = excluded.account_id,
                   task_type = excluded.task_type,
                   data_kind = excluded.data_kind,
                   verification_job_instance_id = excluded.verification_job_instance_id,
                   deployment_start_time = excluded.deployment_start_time,
                   deployment_end_time = excluded.deployment_end_time"#
        )
        .bind(&task.id)
        .bind(&task.account_id)
        .bind(task.task_type.as_str())
        .bind(task.data_kind.as_str())
        .bind(&task.verification_job_instance_id)
        .bind(task.deployment_start_time.map(format_datetime))
        .bind(task.deployment_end_time.map(format_datetime))
        .bind(format_datetime(task.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<VerificationTask>> {
        let row: Option<VerificationTaskRow> = sqlx::query_as(
            "SELECT * FROM verification_tasks WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self) -> DomainResult<Vec<VerificationTask>> {
        let rows: Vec<VerificationTaskRow> = sqlx::query_as(
            "SELECT * FROM verification_tasks ORDER BY created_at, id"
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct VerificationTaskRow {
    id: String,
    account_id: String,
    task_type: String,
    data_kind: String,
    verification_job_instance_id: Option<String>,
    deployment_start_time: Option<String>,
    deployment_end_time: Option<String>,
    created_at: String,
}

impl TryFrom<VerificationTaskRow> for VerificationTask {
    type Error = DomainError;

    fn try_from(row: VerificationTaskRow) -> Result<Self, Self::Error> {
        let task_type = VerificationTaskType::from_str(&row.task_type)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid task type: {}", row.task_type)))?;
        let data_kind = DataSourceKind::from_str(&row.data_kind)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid data kind: {}", row.data_kind)))?;

        Ok(VerificationTask {
            id: row.id,
            account_id: row.account_id,
            task_type,
            data_kind,
            verification_job_instance_id: row.verification_job_instance_id,
            deployment_start_time: parse_optional_datetime(row.deployment_start_time)?,
            deployment_end_time: parse_optional_datetime(row.deployment_end_time)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(Clone)]
pub struct SqliteVerificationJobInstanceRepository {
    pool: SqlitePool,
}

impl SqliteVerificationJobInstanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationJobInstanceRepository for SqliteVerificationJobInstanceRepository {
    async fn save(&self, instance: &VerificationJobInstance) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO verification_job_instances (id, execution_status, verification_status, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   execution_status = excluded.execution_status,
                   verification_status = excluded.verification_status,
                   updated_at = excluded.updated_at"#
        )
        .bind(&instance.id)
        .bind(instance.execution_status.as_str())
        .bind(instance.verification_status.map(|s| s.as_str()))
        .bind(format_datetime(instance.created_at))
        .bind(format_datetime(instance.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<VerificationJobInstance>> {
        let row: Option<JobInstanceRow> = sqlx::query_as(
            "SELECT * FROM verification_job_instances WHERE id = ?"
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_status(
        &self,
        id: &str,
        execution_status: ExecutionStatus,
        verification_status: Option<VerificationStatus>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE verification_job_instances
               SET execution_status = ?, verification_status = ?, updated_at = ?
               WHERE id = ?"#
        )
        .bind(execution_status.as_str())
        .bind(verification_status.map(|s| s.as_str()))
        .bind(format_datetime(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::JobInstanceNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct JobInstanceRow {
    id: String,
    execution_status: String,
    verification_status: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<JobInstanceRow> for VerificationJobInstance {
    type Error = DomainError;

    fn try_from(row: JobInstanceRow) -> Result<Self, Self::Error> {
        let execution_status = ExecutionStatus::from_str(&row.execution_status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid execution status: {}", row.execution_status))
        })?;
        let verification_status = row
            .verification_status
            .map(|s| {
                VerificationStatus::from_str(&s)
                    .ok_or_else(|| DomainError::SerializationError(format!("Invalid verification status: {s}")))
            })
            .transpose()?;

        Ok(VerificationJobInstance {
            id: row.id,
            execution_status,
            verification_status,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
