//! Report rendering contract used by output nodes.
//!
//! Spreadsheet layout and file writing belong to an external renderer; the
//! output node only assembles a [`ReportDocument`] and asks for it to be
//! rendered.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::NodeError;

/// A column of the main report table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportColumn {
    pub field: String,
    pub label: String,
}

/// Renderer-agnostic description of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub title: String,
    /// Sheet / file stem, e.g. `ap_aging`.
    pub report_name: String,
    pub columns: Vec<ReportColumn>,
    pub rows: Vec<Value>,
    /// Named auxiliary sections (groups, summary, totals, duplicates).
    pub sections: serde_json::Map<String, Value>,
}

/// What a renderer produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedReport {
    pub file_name: String,
    pub format: String,
    pub row_count: usize,
    /// Inline content for renderers that do not write files.
    pub content: Option<Value>,
}

#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, document: &ReportDocument) -> Result<RenderedReport, NodeError>;
}

/// Renders the document as inline JSON; no file is written.
#[derive(Debug, Clone, Default)]
pub struct JsonReportRenderer;

#[async_trait]
impl ReportRenderer for JsonReportRenderer {
    async fn render(&self, document: &ReportDocument) -> Result<RenderedReport, NodeError> {
        let content = serde_json::to_value(document).map_err(|e| NodeError::Collaborator {
            collaborator: "report renderer",
            message: e.to_string(),
        })?;
        Ok(RenderedReport {
            file_name: format!("{}.json", document.report_name),
            format: "json".into(),
            row_count: document.rows.len(),
            content: Some(content),
        })
    }
}
