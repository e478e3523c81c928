//! The `ExecutableNode` trait: the contract every node must fulfil.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::NodeError;

/// Named values flowing into and out of a node.
///
/// `serde_json::Map` keeps keys ordered, so identical payloads always
/// serialise to identical bytes.
pub type Payload = Map<String, Value>;

/// Shared context passed to every node during execution.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the workflow run this invocation belongs to.
    pub run_id: uuid::Uuid,
    /// Identifier of the node instance inside the workflow definition.
    pub node_id: String,
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// The closed set of capability classes a node can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCapability {
    Fetch,
    Calculate,
    Filter,
    Sort,
    Group,
    Transform,
    Summarize,
    Output,
}

impl fmt::Display for NodeCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fetch => "fetch",
            Self::Calculate => "calculate",
            Self::Filter => "filter",
            Self::Sort => "sort",
            Self::Group => "group",
            Self::Transform => "transform",
            Self::Summarize => "summarize",
            Self::Output => "output",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// A named input a node accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPort {
    pub name: String,
    /// Required inputs must be bound by the workflow definition.
    pub required: bool,
}

impl InputPort {
    pub fn required(name: impl Into<String>) -> Self {
        Self { name: name.into(), required: true }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self { name: name.into(), required: false }
    }
}

/// The input keys a node expects and the output keys it produces.
///
/// Used at plan time to check every binding against both ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePorts {
    pub inputs: Vec<InputPort>,
    pub outputs: Vec<String>,
}

impl NodePorts {
    pub fn new(inputs: Vec<InputPort>, outputs: &[&str]) -> Self {
        Self {
            inputs,
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn input(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }
}

// ---------------------------------------------------------------------------
// ExecutableNode
// ---------------------------------------------------------------------------

/// The core node trait.
///
/// Nodes are pure transforms from named inputs plus configuration to named
/// outputs. Failures are returned, never panicked; the engine also catches
/// panics at the invocation boundary.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Registry key for this implementation (e.g. `aging_calculator`).
    fn type_id(&self) -> &str;

    /// Capability class of the node.
    fn capability(&self) -> NodeCapability;

    /// Declared input and output keys.
    fn ports(&self) -> NodePorts;

    /// Execute the node against its resolved inputs and its configuration.
    async fn execute(
        &self,
        inputs: Payload,
        config: &Payload,
        ctx: &ExecutionContext,
    ) -> Result<Payload, NodeError>;
}
