//! `workflow_runs` repository functions.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{NewRun, RunOutcome, WorkflowRunRow},
    DbError,
};

/// Insert a run, or refresh its status and start time if it already exists.
pub async fn upsert_run_start(pool: &PgPool, run: &NewRun<'_>) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_runs
            (id, workflow_name, domain, report_type, status, workflow_definition, created_at, started_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status, started_at = EXCLUDED.started_at
        "#,
    )
    .bind(run.id)
    .bind(run.workflow_name)
    .bind(run.domain)
    .bind(run.report_type)
    .bind(run.status)
    .bind(&run.workflow_definition)
    .bind(run.created_at)
    .bind(run.started_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Write the final status, result and error of a run.
///
/// # Errors
/// [`DbError::NotFound`] if the run was never recorded.
pub async fn finish_run(pool: &PgPool, run_id: Uuid, outcome: &RunOutcome<'_>) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE workflow_runs
        SET status = $1,
            execution_result = $2,
            error = $3,
            started_at = COALESCE(started_at, $4),
            completed_at = $5
        WHERE id = $6
        "#,
    )
    .bind(outcome.status)
    .bind(&outcome.execution_result)
    .bind(&outcome.error)
    .bind(outcome.started_at)
    .bind(outcome.completed_at)
    .bind(run_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Fetch a single run by ID.
pub async fn get_run(pool: &PgPool, run_id: Uuid) -> Result<WorkflowRunRow, DbError> {
    sqlx::query_as::<_, WorkflowRunRow>(
        r#"
        SELECT id, workflow_name, domain, report_type, status, workflow_definition,
               execution_result, error, created_at, started_at, completed_at
        FROM workflow_runs
        WHERE id = $1
        "#,
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Most recent runs first.
pub async fn list_runs(pool: &PgPool, limit: i64) -> Result<Vec<WorkflowRunRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRunRow>(
        r#"
        SELECT id, workflow_name, domain, report_type, status, workflow_definition,
               execution_result, error, created_at, started_at, completed_at
        FROM workflow_runs
        ORDER BY created_at DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
