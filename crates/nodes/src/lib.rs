//! `nodes` crate: the `ExecutableNode` trait and built-in node implementations.
//!
//! Every node (built-in and test double alike) must implement
//! [`ExecutableNode`]. The engine crate dispatches execution through this
//! trait object and never inspects a node's concrete type.
//!
//! External collaborators are traits injected at construction:
//! [`source::InvoiceSource`] for invoice data, [`quality::DocumentQualityGate`]
//! for parsed-document scoring and [`render::ReportRenderer`] for output.

pub mod aggregation;
pub mod calculation;
pub mod error;
pub mod fetch;
pub mod fields;
pub mod mock;
pub mod output;
pub mod quality;
pub mod render;
pub mod source;
pub mod traits;

pub use error::NodeError;
pub use traits::{ExecutableNode, ExecutionContext, InputPort, NodeCapability, NodePorts, Payload};
