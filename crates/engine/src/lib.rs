//! `engine` crate: workflow models, DAG validation, the node registry, the
//! report planner and the execution engine.

pub mod config;
pub mod dag;
pub mod error;
pub mod executor;
pub mod models;
pub mod planner;
pub mod registry;
pub mod sink;
pub mod templates;

pub use config::ExecutorConfig;
pub use dag::{validate_dag, validate_definition};
pub use error::{EngineError, ErrorKind};
pub use executor::{RunHandle, WorkflowExecutor};
pub use models::{
    ExecutionPolicy, InputBinding, NodeExecutionRecord, NodeSpec, NodeStatus, RunError, RunStatus,
    WorkflowDefinition, WorkflowRun,
};
pub use planner::{ReportRequest, WorkflowPlanner};
pub use registry::{NodeMetadata, NodeRegistry};
pub use sink::{ExecutionLogSink, InMemoryLogSink, PgLogSink, SinkError, TracingLogSink};

#[cfg(test)]
mod executor_tests;
