//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory. Definitions and runs serialise to the opaque JSONB payloads of the
//! `workflow_runs` and `node_executions` tables.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use nodes::Payload;

use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// NodeSpec
// ---------------------------------------------------------------------------

/// Wires one consumer input to one producer output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBinding {
    /// Input name on the consuming node.
    pub input: String,
    /// Identifier of the producing node.
    pub from: String,
    /// Output key on the producing node.
    pub output: String,
}

impl InputBinding {
    pub fn new(input: impl Into<String>, from: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            from: from.into(),
            output: output.into(),
        }
    }
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique identifier within this definition (referenced by bindings).
    pub id: String,
    /// Maps to a registered `ExecutableNode` implementation.
    pub node_type: String,
    /// Configuration passed to the node at execution time.
    #[serde(default)]
    pub config: Payload,
    /// Ordered input bindings.
    #[serde(default)]
    pub inputs: Vec<InputBinding>,
    /// Exempts the node from the must-reach-a-terminal rule.
    #[serde(default)]
    pub side_effecting: bool,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: Payload::new(),
            inputs: Vec::new(),
            side_effecting: false,
        }
    }

    pub fn with_config(mut self, config: Payload) -> Self {
        self.config = config;
        self
    }

    pub fn bind(mut self, input: &str, from: &str, output: &str) -> Self {
        self.inputs.push(InputBinding::new(input, from, output));
        self
    }

    pub fn side_effecting(mut self) -> Self {
        self.side_effecting = true;
        self
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// What happens to the rest of the run when a node fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPolicy {
    /// The first failure stops dispatch and fails the run.
    #[default]
    FailFast,
    /// Independent branches keep running; the run completes if any terminal
    /// produced output.
    BestEffort,
}

/// An immutable DAG description of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    /// Domain tag, e.g. `accounts_payable`.
    #[serde(default)]
    pub domain: String,
    /// Report-type tag, e.g. `aging`.
    #[serde(default)]
    pub report_type: String,
    pub nodes: Vec<NodeSpec>,
    /// Nodes whose outputs form the run result.
    pub terminals: Vec<String>,
    #[serde(default)]
    pub policy: ExecutionPolicy,
}

impl WorkflowDefinition {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, nodes: Vec<NodeSpec>, terminals: &[&str]) -> Self {
        Self {
            name: name.into(),
            domain: String::new(),
            report_type: String::new(),
            nodes,
            terminals: terminals.iter().map(|t| t.to_string()).collect(),
            policy: ExecutionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn is_terminal(&self, id: &str) -> bool {
        self.terminals.iter().any(|t| t == id)
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle of a run: `planned → running → {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Planned,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Runs and records
// ---------------------------------------------------------------------------

/// Structured, caller-visible error: taxonomy code plus human message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: ErrorKind,
    pub node_id: Option<String>,
    pub message: String,
}

/// One node invocation (or skip decision) within a run. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    pub run_id: Uuid,
    /// Dispatch order within the run, starting at 0.
    pub step_index: u32,
    pub node_id: String,
    pub node_type: String,
    pub status: NodeStatus,
    pub input: Payload,
    pub output: Option<Payload>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<RunError>,
}

/// One execution attempt of a definition, with its audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    /// Snapshot shared with the executor; never mutated once the run starts.
    pub definition: Arc<WorkflowDefinition>,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Terminal outputs keyed by terminal node id.
    pub result: Option<Value>,
    pub error: Option<RunError>,
    pub node_executions: Vec<NodeExecutionRecord>,
}

impl WorkflowRun {
    pub fn new(definition: Arc<WorkflowDefinition>) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition,
            status: RunStatus::Planned,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            node_executions: Vec::new(),
        }
    }

    pub fn record(&self, node_id: &str) -> Option<&NodeExecutionRecord> {
        self.node_executions.iter().find(|r| r.node_id == node_id)
    }
}
