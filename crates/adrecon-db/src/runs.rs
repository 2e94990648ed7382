//! Database operations for the `pipeline_runs` ledger.
//!
//! Every import and aggregation records one row here. Status moves
//! `queued -> running -> succeeded | failed`; any other transition is
//! rejected with [`DbError::InvalidRunTransition`].

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

const RUN_COLUMNS: &str = "id, public_id, run_type, trigger_source, status, \
                           started_at, completed_at, records_processed, error_message, created_at";

/// A row from the `pipeline_runs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PipelineRunRow {
    pub id: i64,
    pub public_id: Uuid,
    /// `import:<entity>`, `aggregate:metrics` or `aggregate:notes`.
    pub run_type: String,
    /// `cli` or `scheduler`.
    pub trigger_source: String,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Creates a new run in `queued` status and returns the full row.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_run(
    pool: &PgPool,
    run_type: &str,
    trigger_source: &str,
) -> Result<PipelineRunRow, DbError> {
    let row = sqlx::query_as::<_, PipelineRunRow>(&format!(
        "INSERT INTO pipeline_runs (public_id, run_type, trigger_source, status) \
         VALUES ($1, $2, $3, 'queued') \
         RETURNING {RUN_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(run_type)
    .bind(trigger_source)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Marks a queued run as `running` and stamps `started_at`.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not queued, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn start_run(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE pipeline_runs \
         SET status = 'running', started_at = NOW() \
         WHERE id = $1 AND status = 'queued'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "queued",
        });
    }

    Ok(())
}

/// Marks a running run as `succeeded` with its processed-record count.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not running, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn complete_run(pool: &PgPool, id: i64, records_processed: i32) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE pipeline_runs \
         SET status = 'succeeded', completed_at = NOW(), records_processed = $1 \
         WHERE id = $2 AND status = 'running'",
    )
    .bind(records_processed)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// Marks a running run as `failed` and records the error message.
///
/// # Errors
///
/// Returns [`DbError::InvalidRunTransition`] if the run is not running, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn fail_run(pool: &PgPool, id: i64, error_message: &str) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE pipeline_runs \
         SET status = 'failed', completed_at = NOW(), error_message = $1 \
         WHERE id = $2 AND status = 'running'",
    )
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidRunTransition {
            id,
            expected_status: "running",
        });
    }

    Ok(())
}

/// # Errors
///
/// Returns [`DbError::NotFound`] if no run has the given `id`, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_run(pool: &PgPool, id: i64) -> Result<PipelineRunRow, DbError> {
    sqlx::query_as::<_, PipelineRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Returns the most recent `limit` runs, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_runs(pool: &PgPool, limit: i64) -> Result<Vec<PipelineRunRow>, DbError> {
    let rows = sqlx::query_as::<_, PipelineRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM pipeline_runs \
         ORDER BY created_at DESC, id DESC \
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
