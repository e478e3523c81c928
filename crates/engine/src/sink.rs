//! Execution log sink: where runs and node records are persisted.
//!
//! The executor calls the sink at each state transition and never lets a
//! sink failure affect the run: errors are logged with `warn!` and dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use db::models::{NewRun, NodeExecutionRow, RunOutcome};
use db::{DbError, DbPool};

use crate::models::{NodeExecutionRecord, RunStatus, WorkflowRun};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("run-log database error: {0}")]
    Database(#[from] DbError),

    #[error("run-log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run-log sink unavailable: {0}")]
    Unavailable(String),
}

/// Receives the audit trail of every run.
#[async_trait]
pub trait ExecutionLogSink: Send + Sync {
    /// Called once when the run starts (`running`), or once with a `failed`
    /// run that was cancelled before its first dispatch.
    async fn record_run_start(&self, run: &WorkflowRun) -> Result<(), SinkError>;

    /// Called once per dispatched or skipped node.
    async fn record_node_execution(&self, record: &NodeExecutionRecord) -> Result<(), SinkError>;

    /// Called exactly once with the run in its final state.
    async fn record_run_end(&self, run: &WorkflowRun) -> Result<(), SinkError>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

/// Writes runs and node records through the `db` repository.
#[derive(Debug, Clone)]
pub struct PgLogSink {
    pool: DbPool,
}

impl PgLogSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionLogSink for PgLogSink {
    async fn record_run_start(&self, run: &WorkflowRun) -> Result<(), SinkError> {
        let def = &run.definition;
        let new_run = NewRun {
            id: run.id,
            workflow_name: &def.name,
            domain: &def.domain,
            report_type: &def.report_type,
            status: run.status.as_str(),
            workflow_definition: serde_json::to_value(def.as_ref())?,
            created_at: run.created_at,
            started_at: run.started_at,
        };
        db::repository::runs::upsert_run_start(&self.pool, &new_run).await?;
        Ok(())
    }

    async fn record_node_execution(&self, record: &NodeExecutionRecord) -> Result<(), SinkError> {
        let row = NodeExecutionRow {
            id: Uuid::new_v4(),
            run_id: record.run_id,
            step_index: i32::try_from(record.step_index).unwrap_or(i32::MAX),
            node_id: record.node_id.clone(),
            node_type: record.node_type.clone(),
            status: record.status.as_str().to_owned(),
            input: serde_json::Value::Object(record.input.clone()),
            output: record.output.clone().map(serde_json::Value::Object),
            error: record.error.as_ref().map(|e| e.message.clone()),
            error_kind: record.error.as_ref().map(|e| e.kind.as_str().to_owned()),
            started_at: record.started_at,
            finished_at: record.finished_at,
            duration_ms: i64::try_from(record.duration_ms).unwrap_or(i64::MAX),
        };
        db::repository::node_executions::insert_node_execution(&self.pool, &row).await?;
        Ok(())
    }

    async fn record_run_end(&self, run: &WorkflowRun) -> Result<(), SinkError> {
        let completed_at = run.completed_at.ok_or_else(|| {
            SinkError::Unavailable(format!("run {} ended without a completion time", run.id))
        })?;
        let error = run.error.as_ref().map(serde_json::to_value).transpose()?;
        let outcome = RunOutcome {
            status: run.status.as_str(),
            execution_result: run.result.clone(),
            error,
            started_at: run.started_at,
            completed_at,
        };
        db::repository::runs::finish_run(&self.pool, run.id, &outcome).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// A run as the in-memory sink last saw it.
#[derive(Debug, Clone)]
pub struct LoggedRun {
    pub run_id: Uuid,
    pub started_status: RunStatus,
    pub final_status: Option<RunStatus>,
    pub end_writes: usize,
}

#[derive(Debug, Default)]
struct Store {
    runs: Vec<LoggedRun>,
    records: Vec<NodeExecutionRecord>,
}

/// Keeps everything in memory. Used by tests and the CLI when no database is
/// configured.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLogSink {
    store: Arc<Mutex<Store>>,
}

impl InMemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn runs(&self) -> Vec<LoggedRun> {
        self.lock().runs.clone()
    }

    pub fn run(&self, run_id: Uuid) -> Option<LoggedRun> {
        self.lock().runs.iter().find(|r| r.run_id == run_id).cloned()
    }

    /// Node records of one run in the order they were written.
    pub fn records(&self, run_id: Uuid) -> Vec<NodeExecutionRecord> {
        self.lock()
            .records
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ExecutionLogSink for InMemoryLogSink {
    async fn record_run_start(&self, run: &WorkflowRun) -> Result<(), SinkError> {
        let mut store = self.lock();
        match store.runs.iter_mut().find(|r| r.run_id == run.id) {
            Some(existing) => existing.started_status = run.status,
            None => store.runs.push(LoggedRun {
                run_id: run.id,
                started_status: run.status,
                final_status: None,
                end_writes: 0,
            }),
        }
        Ok(())
    }

    async fn record_node_execution(&self, record: &NodeExecutionRecord) -> Result<(), SinkError> {
        self.lock().records.push(record.clone());
        Ok(())
    }

    async fn record_run_end(&self, run: &WorkflowRun) -> Result<(), SinkError> {
        let mut store = self.lock();
        let logged = store
            .runs
            .iter_mut()
            .find(|r| r.run_id == run.id)
            .ok_or_else(|| SinkError::Unavailable(format!("run {} was never started", run.id)))?;
        logged.final_status = Some(run.status);
        logged.end_writes += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Emits every sink event as a structured `tracing` event and stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

#[async_trait]
impl ExecutionLogSink for TracingLogSink {
    async fn record_run_start(&self, run: &WorkflowRun) -> Result<(), SinkError> {
        info!(run_id = %run.id, workflow = %run.definition.name, status = %run.status, "run started");
        Ok(())
    }

    async fn record_node_execution(&self, record: &NodeExecutionRecord) -> Result<(), SinkError> {
        info!(
            run_id = %record.run_id,
            step = record.step_index,
            node_id = %record.node_id,
            node_type = %record.node_type,
            status = %record.status,
            duration_ms = record.duration_ms,
            error = record.error.as_ref().map(|e| e.message.as_str()),
            "node recorded"
        );
        Ok(())
    }

    async fn record_run_end(&self, run: &WorkflowRun) -> Result<(), SinkError> {
        info!(
            run_id = %run.id,
            status = %run.status,
            error = run.error.as_ref().map(|e| e.message.as_str()),
            "run finished"
        );
        Ok(())
    }
}

/// Fans every event out to several sinks; the first error is returned after
/// all sinks have been called.
pub struct CompositeLogSink {
    sinks: Vec<Arc<dyn ExecutionLogSink>>,
}

impl CompositeLogSink {
    pub fn new(sinks: Vec<Arc<dyn ExecutionLogSink>>) -> Self {
        Self { sinks }
    }
}

fn first_err(results: Vec<Result<(), SinkError>>) -> Result<(), SinkError> {
    results.into_iter().collect()
}

#[async_trait]
impl ExecutionLogSink for CompositeLogSink {
    async fn record_run_start(&self, run: &WorkflowRun) -> Result<(), SinkError> {
        let mut results = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            results.push(sink.record_run_start(run).await);
        }
        first_err(results)
    }

    async fn record_node_execution(&self, record: &NodeExecutionRecord) -> Result<(), SinkError> {
        let mut results = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            results.push(sink.record_node_execution(record).await);
        }
        first_err(results)
    }

    async fn record_run_end(&self, run: &WorkflowRun) -> Result<(), SinkError> {
        let mut results = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            results.push(sink.record_run_end(run).await);
        }
        first_err(results)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::WorkflowDefinition;

    /// Fails every write.
    pub(crate) struct FailingLogSink;

    #[async_trait]
    impl ExecutionLogSink for FailingLogSink {
        async fn record_run_start(&self, _: &WorkflowRun) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("disk full".into()))
        }
        async fn record_node_execution(&self, _: &NodeExecutionRecord) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("disk full".into()))
        }
        async fn record_run_end(&self, _: &WorkflowRun) -> Result<(), SinkError> {
            Err(SinkError::Unavailable("disk full".into()))
        }
    }

    fn run() -> WorkflowRun {
        WorkflowRun::new(Arc::new(WorkflowDefinition::new("t", vec![], &[])))
    }

    #[tokio::test]
    async fn in_memory_sink_tracks_start_and_end() {
        let sink = InMemoryLogSink::new();
        let mut run = run();
        run.status = RunStatus::Running;
        sink.record_run_start(&run).await.unwrap();

        run.status = RunStatus::Completed;
        sink.record_run_end(&run).await.unwrap();

        let logged = sink.run(run.id).unwrap();
        assert_eq!(logged.started_status, RunStatus::Running);
        assert_eq!(logged.final_status, Some(RunStatus::Completed));
        assert_eq!(logged.end_writes, 1);
    }

    #[tokio::test]
    async fn ending_an_unknown_run_is_an_error() {
        let sink = InMemoryLogSink::new();
        assert!(matches!(sink.record_run_end(&run()).await, Err(SinkError::Unavailable(_))));
    }

    #[tokio::test]
    async fn composite_calls_every_sink() {
        let memory = InMemoryLogSink::new();
        let composite = CompositeLogSink::new(vec![
            Arc::new(FailingLogSink),
            Arc::new(memory.clone()),
        ]);
        let run = run();
        assert!(composite.record_run_start(&run).await.is_err());
        assert!(memory.run(run.id).is_some());
    }
}
