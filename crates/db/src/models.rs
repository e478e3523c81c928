//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models; they carry no domain behaviour.
//! Domain types live in the `engine` crate; definitions, results and errors
//! are stored as opaque JSON payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflow_runs
// ---------------------------------------------------------------------------

/// A persisted workflow run row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRunRow {
    pub id: Uuid,
    pub workflow_name: String,
    pub domain: String,
    pub report_type: String,
    /// One of `planned | running | completed | failed`.
    pub status: String,
    pub workflow_definition: serde_json::Value,
    pub execution_result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Values written when a run is first recorded.
#[derive(Debug, Clone)]
pub struct NewRun<'a> {
    pub id: Uuid,
    pub workflow_name: &'a str,
    pub domain: &'a str,
    pub report_type: &'a str,
    pub status: &'a str,
    pub workflow_definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Values written once, when a run reaches its final state.
#[derive(Debug, Clone)]
pub struct RunOutcome<'a> {
    pub status: &'a str,
    pub execution_result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// node_executions
// ---------------------------------------------------------------------------

/// A persisted node execution row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeExecutionRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_index: i32,
    pub node_id: String,
    pub node_type: String,
    pub status: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_kind: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}
