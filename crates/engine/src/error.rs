//! Engine-level error types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use nodes::NodeError;

use crate::models::RunError;

/// Stable, caller-visible error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    UnknownNodeType,
    UnsupportedReportType,
    InvalidWorkflowDefinition,
    NodeExecutionError,
    DocumentQualityError,
    TimeoutError,
    CancellationError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownNodeType => "UNKNOWN_NODE_TYPE",
            Self::UnsupportedReportType => "UNSUPPORTED_REPORT_TYPE",
            Self::InvalidWorkflowDefinition => "INVALID_WORKFLOW_DEFINITION",
            Self::NodeExecutionError => "NODE_EXECUTION_ERROR",
            Self::DocumentQualityError => "DOCUMENT_QUALITY_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::CancellationError => "CANCELLATION_ERROR",
        }
    }

    /// Build-time errors abort planning; no run is created for them.
    pub fn is_build_time(&self) -> bool {
        matches!(
            self,
            Self::UnknownNodeType | Self::UnsupportedReportType | Self::InvalidWorkflowDefinition
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn in_node(node_id: &Option<String>) -> String {
    node_id
        .as_deref()
        .map(|id| format!(" (node '{id}')"))
        .unwrap_or_default()
}

/// Errors produced by the workflow engine (planning, validation, execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Build-time errors ------

    /// A node-type is not present in the registry.
    #[error("unknown node type '{node_type}'{}", in_node(.node_id))]
    UnknownNodeType {
        node_type: String,
        node_id: Option<String>,
    },

    /// No template exists for the requested (domain, report type).
    #[error("unsupported report type '{report_type}' for domain '{domain}'")]
    UnsupportedReportType { domain: String, report_type: String },

    /// Structural problem with a definition: duplicate ids, unresolved or
    /// mismatched bindings, cycles, orphans, bad terminals.
    #[error("invalid workflow definition: {reason} [{}]", .node_ids.join(", "))]
    InvalidWorkflowDefinition {
        node_ids: Vec<String>,
        reason: String,
    },

    // ------ Run-time errors ------

    /// A node returned a non-retryable error.
    #[error("node '{node_id}' failed: {source}")]
    NodeExecution {
        node_id: String,
        #[source]
        source: NodeError,
    },

    /// A node's retryable error was exhausted.
    #[error("node '{node_id}' exceeded retry limit after {attempts} attempts: {message}")]
    NodeRetryExhausted {
        node_id: String,
        attempts: u32,
        message: String,
    },

    /// A node panicked or its task was aborted.
    #[error("node '{node_id}' aborted: {message}")]
    NodeAborted { node_id: String, message: String },

    /// A required binding produced no value.
    #[error("node '{node_id}' input '{input}': producer '{from}' did not emit '{output}'")]
    MissingInput {
        node_id: String,
        input: String,
        from: String,
        output: String,
    },

    /// A fetch-class node rejected a document below the quality threshold.
    #[error("node '{node_id}': {source}")]
    DocumentQuality {
        node_id: String,
        #[source]
        source: NodeError,
    },

    /// A node exceeded its configured timeout.
    #[error("node '{node_id}' timed out after {timeout:?}")]
    Timeout { node_id: String, timeout: Duration },

    /// The run was cancelled before it finished.
    #[error("workflow run cancelled{}", in_node(.node_id))]
    Cancelled { node_id: Option<String> },
}

impl EngineError {
    /// Wrap a node's own failure, classifying quality-gate rejections.
    pub fn from_node(node_id: &str, source: NodeError) -> Self {
        match source {
            NodeError::DocumentQuality { .. } => Self::DocumentQuality {
                node_id: node_id.to_owned(),
                source,
            },
            source => Self::NodeExecution {
                node_id: node_id.to_owned(),
                source,
            },
        }
    }

    pub fn invalid(node_ids: Vec<String>, reason: impl Into<String>) -> Self {
        Self::InvalidWorkflowDefinition {
            node_ids,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownNodeType { .. } => ErrorKind::UnknownNodeType,
            Self::UnsupportedReportType { .. } => ErrorKind::UnsupportedReportType,
            Self::InvalidWorkflowDefinition { .. } => ErrorKind::InvalidWorkflowDefinition,
            Self::NodeExecution { .. }
            | Self::NodeRetryExhausted { .. }
            | Self::NodeAborted { .. }
            | Self::MissingInput { .. } => ErrorKind::NodeExecutionError,
            Self::DocumentQuality { .. } => ErrorKind::DocumentQualityError,
            Self::Timeout { .. } => ErrorKind::TimeoutError,
            Self::Cancelled { .. } => ErrorKind::CancellationError,
        }
    }

    /// The node the error is attributed to, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::UnknownNodeType { node_id, .. } | Self::Cancelled { node_id } => {
                node_id.as_deref()
            }
            Self::UnsupportedReportType { .. } => None,
            Self::InvalidWorkflowDefinition { node_ids, .. } => {
                node_ids.first().map(String::as_str)
            }
            Self::NodeExecution { node_id, .. }
            | Self::NodeRetryExhausted { node_id, .. }
            | Self::NodeAborted { node_id, .. }
            | Self::MissingInput { node_id, .. }
            | Self::DocumentQuality { node_id, .. }
            | Self::Timeout { node_id, .. } => Some(node_id),
        }
    }

    /// Structured form stored on runs and node records.
    pub fn to_run_error(&self) -> RunError {
        RunError {
            kind: self.kind(),
            node_id: self.node_id().map(str::to_owned),
            message: self.to_string(),
        }
    }
}
