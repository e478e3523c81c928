//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine uses the variant to decide retry behaviour and how the failure
/// is classified in the node's execution record:
/// - `Retryable`: re-invoked with exponential back-off.
/// - `DocumentQuality`: surfaced as a document-quality failure.
/// - everything else: a plain node execution failure, never retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeError {
    /// Transient failure; the engine should re-try the invocation.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),

    /// A bound input was missing or had the wrong shape.
    #[error("invalid input '{key}': {message}")]
    InvalidInput { key: String, message: String },

    /// The node's configuration could not be interpreted.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A parsed document scored below the configured quality threshold.
    #[error("document '{document}' failed quality gate: score {score:.2} < threshold {threshold:.2}")]
    DocumentQuality {
        document: String,
        score: f64,
        threshold: f64,
        errors: Vec<String>,
    },

    /// An external collaborator (invoice source, report renderer) failed.
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },
}

impl NodeError {
    /// Shorthand for an [`NodeError::InvalidInput`] error.
    pub fn invalid_input(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether the engine may re-invoke the node after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}
