//! `node_executions` repository functions.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::NodeExecutionRow, DbError};

/// Append a node execution record. Records are never updated.
pub async fn insert_node_execution(pool: &PgPool, row: &NodeExecutionRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO node_executions
            (id, run_id, step_index, node_id, node_type, status, input, output,
             error, error_kind, started_at, finished_at, duration_ms)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(row.id)
    .bind(row.run_id)
    .bind(row.step_index)
    .bind(&row.node_id)
    .bind(&row.node_type)
    .bind(&row.status)
    .bind(&row.input)
    .bind(&row.output)
    .bind(&row.error)
    .bind(&row.error_kind)
    .bind(row.started_at)
    .bind(row.finished_at)
    .bind(row.duration_ms)
    .execute(pool)
    .await?;

    Ok(())
}

/// All node records of a run in step order.
pub async fn list_node_executions(pool: &PgPool, run_id: Uuid) -> Result<Vec<NodeExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, NodeExecutionRow>(
        r#"
        SELECT id, run_id, step_index, node_id, node_type, status, input, output,
               error, error_kind, started_at, finished_at, duration_ms
        FROM node_executions
        WHERE run_id = $1
        ORDER BY step_index
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
