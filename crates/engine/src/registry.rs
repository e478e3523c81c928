//! Node registry: maps node-type identifiers to constructors and metadata.
//!
//! A registry is populated once at startup through explicit `register`
//! calls, then shared read-only (`Arc<NodeRegistry>`) by the planner and
//! every concurrent run.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use nodes::aggregation::{FilterNode, GroupingNode, SortNode, SummaryNode};
use nodes::calculation::{
    AgingCalculatorNode, DuplicateDetectorNode, OutstandingCalculatorNode, SlaCheckerNode,
    TotalsCalculationNode,
};
use nodes::fetch::InvoiceFetchNode;
use nodes::output::{DataTransformationNode, ExcelReportNode};
use nodes::quality::DocumentQualityGate;
use nodes::render::ReportRenderer;
use nodes::source::InvoiceSource;
use nodes::{ExecutableNode, NodeCapability, NodePorts};

use crate::EngineError;

/// Builds a node instance for one workflow step.
pub type NodeConstructor = Arc<dyn Fn() -> Arc<dyn ExecutableNode> + Send + Sync>;

/// Human-readable description of a node type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub title: String,
    pub description: String,
    pub category: String,
}

impl NodeMetadata {
    pub fn new(title: &str, description: &str, category: &str) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            category: category.into(),
        }
    }

    /// Label derived from a type id when nothing was registered:
    /// `SlaCheckerNode` and `sla_checker` both become `Sla Checker`.
    pub fn derived(type_id: &str) -> Self {
        let base = type_id.strip_suffix("Node").unwrap_or(type_id);
        let base = base.strip_suffix("_node").unwrap_or(base);

        let mut spaced = String::with_capacity(base.len() + 4);
        let mut prev_lower = false;
        for c in base.chars() {
            if c == '_' || c == '-' {
                spaced.push(' ');
                prev_lower = false;
                continue;
            }
            if c.is_uppercase() && prev_lower {
                spaced.push(' ');
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            spaced.push(c);
        }

        let title = spaced
            .split_whitespace()
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join(" ");

        Self {
            description: format!("Execute {title}"),
            title,
            category: "unknown".into(),
        }
    }
}

/// Everything a caller needs to present one node type.
#[derive(Debug, Clone, Serialize)]
pub struct NodeDescription {
    pub type_id: String,
    #[serde(flatten)]
    pub metadata: NodeMetadata,
    pub capability: NodeCapability,
    pub ports: NodePorts,
}

struct Entry {
    constructor: NodeConstructor,
    metadata: Option<NodeMetadata>,
}

/// Maps `node_type` strings to node constructors.
#[derive(Default)]
pub struct NodeRegistry {
    entries: BTreeMap<String, Entry>,
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a node type.
    pub fn register(
        &mut self,
        type_id: impl Into<String>,
        constructor: NodeConstructor,
        metadata: Option<NodeMetadata>,
    ) -> &mut Self {
        self.entries.insert(type_id.into(), Entry { constructor, metadata });
        self
    }

    /// Register a shared instance under its own `type_id`.
    pub fn register_node(
        &mut self,
        node: Arc<dyn ExecutableNode>,
        metadata: Option<NodeMetadata>,
    ) -> &mut Self {
        let type_id = node.type_id().to_owned();
        self.register(type_id, Arc::new(move || node.clone()), metadata)
    }

    /// Constructor for `type_id`.
    ///
    /// # Errors
    /// [`EngineError::UnknownNodeType`] when nothing is registered under it.
    pub fn resolve(&self, type_id: &str) -> Result<NodeConstructor, EngineError> {
        self.entries
            .get(type_id)
            .map(|e| e.constructor.clone())
            .ok_or_else(|| EngineError::UnknownNodeType {
                node_type: type_id.to_owned(),
                node_id: None,
            })
    }

    /// Registered metadata, or a label derived from the type id. Never fails.
    pub fn describe(&self, type_id: &str) -> NodeMetadata {
        self.entries
            .get(type_id)
            .and_then(|e| e.metadata.clone())
            .unwrap_or_else(|| NodeMetadata::derived(type_id))
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.entries.contains_key(type_id)
    }

    /// Registered type ids in sorted order.
    pub fn type_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Metadata, capability and ports of every registered type.
    pub fn catalogue(&self) -> Vec<NodeDescription> {
        self.entries
            .iter()
            .map(|(type_id, entry)| {
                let node = (entry.constructor)();
                NodeDescription {
                    type_id: type_id.clone(),
                    metadata: entry
                        .metadata
                        .clone()
                        .unwrap_or_else(|| NodeMetadata::derived(type_id)),
                    capability: node.capability(),
                    ports: node.ports(),
                }
            })
            .collect()
    }

    /// Registry holding the whole finance node catalogue.
    pub fn with_builtins(
        source: Arc<dyn InvoiceSource>,
        gate: Arc<dyn DocumentQualityGate>,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Self {
        let mut registry = Self::new();
        registry
            .register_node(
                Arc::new(InvoiceFetchNode::new(source, gate)),
                Some(NodeMetadata::new("Fetch Invoices", "Retrieve invoices from the invoice store", "data_fetch")),
            )
            .register_node(
                Arc::new(OutstandingCalculatorNode),
                Some(NodeMetadata::new("Calculate Outstanding", "Calculate outstanding amounts for invoices", "calculation")),
            )
            .register_node(
                Arc::new(AgingCalculatorNode),
                Some(NodeMetadata::new("Calculate Aging Days", "Calculate aging buckets (0-30, 31-60, etc.)", "calculation")),
            )
            .register_node(
                Arc::new(TotalsCalculationNode),
                Some(NodeMetadata::new("Calculate Totals", "Calculate summary totals", "calculation")),
            )
            .register_node(
                Arc::new(FilterNode),
                Some(NodeMetadata::new("Filter Data", "Filter data based on conditions", "processing")),
            )
            .register_node(
                Arc::new(SortNode),
                Some(NodeMetadata::new("Sort Data", "Sort data by specified fields", "processing")),
            )
            .register_node(
                Arc::new(GroupingNode),
                Some(NodeMetadata::new("Group by Bucket", "Group data into categories", "processing")),
            )
            .register_node(
                Arc::new(DataTransformationNode),
                Some(NodeMetadata::new("Format Data", "Transform data for output", "processing")),
            )
            .register_node(
                Arc::new(SummaryNode),
                Some(NodeMetadata::new("Calculate Summary", "Generate summary statistics", "analysis")),
            )
            .register_node(
                Arc::new(SlaCheckerNode),
                Some(NodeMetadata::new("Check SLA Breaches", "Check for SLA breaches", "analysis")),
            )
            .register_node(
                Arc::new(DuplicateDetectorNode),
                Some(NodeMetadata::new("Detect Duplicates", "Identify duplicate invoices", "analysis")),
            )
            .register_node(
                Arc::new(ExcelReportNode::new(renderer)),
                Some(NodeMetadata::new("Export Excel", "Generate Excel report", "output")),
            );
        registry
    }
}
