//! SQLite database adapters for the Vigil orchestration engine.

pub mod connection;
pub mod learning_engine_task_repository;
pub mod migrations;
pub mod orchestrator_repository;
pub mod state_machine_repository;
pub mod verification_task_repository;

pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use learning_engine_task_repository::SqliteLearningEngineTaskRepository;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use orchestrator_repository::SqliteAnalysisOrchestratorRepository;
pub use state_machine_repository::SqliteAnalysisStateMachineRepository;
pub use verification_task_repository::{
    SqliteVerificationJobInstanceRepository, SqliteVerificationTaskRepository,
};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Format a timestamp for storage.
///
/// Fixed-width UTC with microseconds, so that text comparison in SQL
/// orders the same way as the instants do.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a UUID string from a SQLite row field.
pub fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional RFC3339 datetime string from a SQLite row field.
pub fn parse_optional_datetime(s: Option<String>) -> DomainResult<Option<DateTime<Utc>>> {
    s.map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse a JSON string from a SQLite row field, falling back to the type's default.
pub fn parse_json_or_default<T: serde::de::DeserializeOwned + Default>(s: Option<String>) -> DomainResult<T> {
    s.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(Option::unwrap_or_default)
}

/// Map a unique-index violation to a concurrency conflict on `entity`.
pub(crate) fn conflict_or_database_error(err: sqlx::Error, entity: &str, id: &str) -> DomainError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => DomainError::ConcurrencyConflict {
            entity: entity.to_string(),
            id: id.to_string(),
        },
        _ => DomainError::from(err),
    }
}

/// `?, ?, ?` for an `IN (...)` clause with `n` bindings.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),
}

pub async fn initialize_database(database_url: &str, config: Option<PoolConfig>) -> Result<SqlitePool, DatabaseError> {
    let pool = create_pool(database_url, config).await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_format_datetime_orders_lexically() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let t1 = t0 + Duration::microseconds(1);
        let t2 = t0 + Duration::seconds(1);
        let (a, b, c) = (format_datetime(t0), format_datetime(t1), format_datetime(t2));
        assert!(a < b && b < c);
        assert_eq!(a.len(), c.len());
        assert_eq!(parse_datetime(&b).unwrap(), t1);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn test_parse_json_or_default() {
        let empty: Vec<u32> = parse_json_or_default(None).unwrap();
        assert!(empty.is_empty());
        let values: Vec<u32> = parse_json_or_default(Some("[1,2]".to_string())).unwrap();
        assert_eq!(values, vec![1, 2]);
        assert!(parse_json_or_default::<Vec<u32>>(Some("{".to_string())).is_err());
    }
}
