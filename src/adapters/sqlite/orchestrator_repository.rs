//! SQLite implementation of the AnalysisOrchestratorRepository.
//!
//! The backlog is stored as a JSON array on the orchestrator row, so that
//! enqueue, dequeue and status changes commit together under one version
//! check.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::VecDeque;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AnalysisOrchestrator, AnalysisStateMachine, OrchestratorStatus};
use crate::domain::ports::AnalysisOrchestratorRepository;

use super::{conflict_or_database_error, format_datetime, parse_datetime, parse_json_or_default, parse_uuid};

const ENTITY: &str = "AnalysisOrchestrator";

#[derive(Clone)]
pub struct SqliteAnalysisOrchestratorRepository {
    pool: SqlitePool,
}

impl SqliteAnalysisOrchestratorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalysisOrchestratorRepository for SqliteAnalysisOrchestratorRepository {
    async fn insert(&self, orchestrator: &AnalysisOrchestrator) -> DomainResult<()> {
        let queue_json = serde_json::to_string(&orchestrator.analysis_state_machine_queue)?;

        sqlx::query(
            r#"INSERT INTO analysis_orchestrators (uuid, verification_task_id, account_id, status,
               state_machine_queue, version, created_at, last_updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#
        )
        .bind(orchestrator.uuid.to_string())
        .bind(&orchestrator.verification_task_id)
        .bind(&orchestrator.account_id)
        .bind(orchestrator.status.as_str())
        .bind(&queue_json)
        .bind(version_to_i64(orchestrator.version)?)
        .bind(format_datetime(orchestrator.created_at))
        .bind(format_datetime(orchestrator.last_updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_database_error(e, ENTITY, &orchestrator.verification_task_id))?;
        Ok(())
    }

    async fn get(&self, verification_task_id: &str) -> DomainResult<Option<AnalysisOrchestrator>> {
        let row: Option<OrchestratorRow> = sqlx::query_as(
            "SELECT * FROM analysis_orchestrators WHERE verification_task_id = ?"
        )
        .bind(verification_task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, orchestrator: &mut AnalysisOrchestrator) -> DomainResult<()> {
        let queue_json = serde_json::to_string(&orchestrator.analysis_state_machine_queue)?;

        let result = sqlx::query(
            r#"UPDATE analysis_orchestrators
               SET status = ?, state_machine_queue = ?, version = version + 1, last_updated_at = ?
               WHERE verification_task_id = ? AND version = ?"#
        )
        .bind(orchestrator.status.as_str())
        .bind(&queue_json)
        .bind(format_datetime(orchestrator.last_updated_at))
        .bind(&orchestrator.verification_task_id)
        .bind(version_to_i64(orchestrator.version)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<(i64,)> = sqlx::query_as(
                "SELECT version FROM analysis_orchestrators WHERE verification_task_id = ?"
            )
            .bind(&orchestrator.verification_task_id)
            .fetch_optional(&self.pool)
            .await?;

            return Err(match exists {
                Some(_) => DomainError::ConcurrencyConflict {
                    entity: ENTITY.to_string(),
                    id: orchestrator.verification_task_id.clone(),
                },
                None => DomainError::OrchestratorNotFound(orchestrator.verification_task_id.clone()),
            });
        }

        orchestrator.version += 1;
        Ok(())
    }

    async fn list(&self, status: Option<OrchestratorStatus>) -> DomainResult<Vec<AnalysisOrchestrator>> {
        let rows: Vec<OrchestratorRow> = match status {
            Some(status) => {
                sqlx::query_as(
                    "SELECT * FROM analysis_orchestrators WHERE status = ? ORDER BY last_updated_at"
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM analysis_orchestrators ORDER BY last_updated_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

fn version_to_i64(version: u64) -> DomainResult<i64> {
    i64::try_from(version).map_err(|e| DomainError::SerializationError(e.to_string()))
}

#[derive(sqlx::FromRow)]
struct OrchestratorRow {
    uuid: String,
    verification_task_id: String,
    account_id: String,
    status: String,
    state_machine_queue: Option<String>,
    version: i64,
    created_at: String,
    last_updated_at: String,
}

impl TryFrom<OrchestratorRow> for AnalysisOrchestrator {
    type Error = DomainError;

    fn try_from(row: OrchestratorRow) -> Result<Self, Self::Error> {
        let status = OrchestratorStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        let queue: VecDeque<AnalysisStateMachine> = parse_json_or_default(row.state_machine_queue)?;
        let version = u64::try_from(row.version)
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;

        Ok(AnalysisOrchestrator {
            uuid: parse_uuid(&row.uuid)?,
            verification_task_id: row.verification_task_id,
            account_id: row.account_id,
            status,
            analysis_state_machine_queue: queue,
            version,
            created_at: parse_datetime(&row.created_at)?,
            last_updated_at: parse_datetime(&row.last_updated_at)?,
        })
    }
}
