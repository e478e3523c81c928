//! Report shaping and output nodes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::fields::{self, json_f64, number, round2, Record};
use crate::render::{ReportColumn, ReportDocument, ReportRenderer};
use crate::{ExecutableNode, ExecutionContext, InputPort, NodeCapability, NodeError, NodePorts, Payload};

pub const DATA_TRANSFORMATION: &str = "data_transformation";
pub const EXCEL_REPORT: &str = "excel_report";

/// Sections an output node copies verbatim into the report.
const SECTIONS: [&str; 4] = ["groups", "summary", "totals", "duplicates"];

// ---------------------------------------------------------------------------
// Data transformation
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct TransformSettings {
    #[serde(default)]
    columns: Vec<ReportColumn>,
}

/// Maps raw invoice records to the standard report row shape, then projects
/// the configured `columns` (when any) out of it.
pub struct DataTransformationNode;

impl DataTransformationNode {
    fn standard_row(record: &Record) -> Record {
        let invoice_amt = number(record, &["inr_amount", "total_amount", "grand_total"]);
        let tax_amt = number(record, &["tax_amount", "tax_total"]);
        let paid_amt = number(record, &["paid_amount", "received_amount"]);
        let outstanding = match record.get("outstanding").and_then(fields::as_f64) {
            Some(v) => v,
            None => invoice_amt - paid_amt,
        };
        let status = if outstanding <= 0.0 {
            "Paid"
        } else if paid_amt > 0.0 {
            "Partial"
        } else {
            "Unpaid"
        };

        let party = ["vendor_name", "customer_name", "party_name"]
            .iter()
            .find_map(|k| record.get(*k).filter(|v| !v.is_null()))
            .cloned()
            .unwrap_or(Value::Null);

        let mut row = record.clone();
        row.insert("trans_id".into(), record.get("id").cloned().unwrap_or(Value::Null));
        row.insert("party_name".into(), party);
        row.insert(
            "invoice_no".into(),
            record.get("invoice_number").cloned().unwrap_or(Value::Null),
        );
        row.insert("sub_total".into(), json_f64(round2(invoice_amt - tax_amt)));
        row.insert("tax_amt".into(), json_f64(round2(tax_amt)));
        row.insert("net_amt".into(), json_f64(round2(invoice_amt)));
        row.insert("paid_amt".into(), json_f64(round2(paid_amt)));
        row.insert("outstanding".into(), json_f64(round2(outstanding)));
        row.entry("status").or_insert_with(|| Value::String(status.into()));
        row
    }

    fn project(row: Record, columns: &[ReportColumn]) -> Record {
        if columns.is_empty() {
            return row;
        }
        columns
            .iter()
            .map(|c| (c.field.clone(), row.get(&c.field).cloned().unwrap_or(Value::Null)))
            .collect()
    }
}

#[async_trait]
impl ExecutableNode for DataTransformationNode {
    fn type_id(&self) -> &str {
        DATA_TRANSFORMATION
    }

    fn capability(&self) -> NodeCapability {
        NodeCapability::Transform
    }

    fn ports(&self) -> NodePorts {
        NodePorts::new(vec![InputPort::required("invoices")], &["rows", "columns"])
    }

    async fn execute(
        &self,
        mut inputs: Payload,
        config: &Payload,
        _ctx: &ExecutionContext,
    ) -> Result<Payload, NodeError> {
        let settings: TransformSettings = fields::parse_config(config)?;
        let records = fields::take_records(&mut inputs, "invoices")?;

        let rows: Vec<Record> = records
            .iter()
            .map(|r| Self::project(Self::standard_row(r), &settings.columns))
            .collect();

        let columns = serde_json::to_value(&settings.columns)
            .map_err(|e| NodeError::InvalidConfig(e.to_string()))?;

        let mut out = Payload::new();
        out.insert("rows".into(), fields::records_value(rows));
        out.insert("columns".into(), columns);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Excel report
// ---------------------------------------------------------------------------

fn default_title() -> String {
    "Report".into()
}

fn default_report_name() -> String {
    "report".into()
}

#[derive(Debug, Deserialize)]
struct ReportSettings {
    #[serde(default = "default_title")]
    title: String,
    #[serde(default = "default_report_name")]
    report_name: String,
    #[serde(default)]
    columns: Vec<ReportColumn>,
}

/// Assembles a [`ReportDocument`] from upstream outputs and hands it to the
/// configured [`ReportRenderer`].
pub struct ExcelReportNode {
    renderer: Arc<dyn ReportRenderer>,
}

impl ExcelReportNode {
    pub fn new(renderer: Arc<dyn ReportRenderer>) -> Self {
        Self { renderer }
    }

    /// Columns come from config, then from an upstream `columns` input, then
    /// from the keys of the first row.
    fn columns(settings: &ReportSettings, input: Option<Value>, rows: &[Value]) -> Vec<ReportColumn> {
        if !settings.columns.is_empty() {
            return settings.columns.clone();
        }
        if let Some(cols) = input.and_then(|v| serde_json::from_value::<Vec<ReportColumn>>(v).ok()) {
            if !cols.is_empty() {
                return cols;
            }
        }
        rows.first()
            .and_then(Value::as_object)
            .map(|first| {
                first
                    .keys()
                    .map(|k| ReportColumn { field: k.clone(), label: k.clone() })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExecutableNode for ExcelReportNode {
    fn type_id(&self) -> &str {
        EXCEL_REPORT
    }

    fn capability(&self) -> NodeCapability {
        NodeCapability::Output
    }

    fn ports(&self) -> NodePorts {
        let mut inputs = vec![InputPort::optional("rows"), InputPort::optional("columns")];
        inputs.extend(SECTIONS.iter().map(|s| InputPort::optional(*s)));
        NodePorts::new(inputs, &["report"])
    }

    async fn execute(
        &self,
        mut inputs: Payload,
        config: &Payload,
        ctx: &ExecutionContext,
    ) -> Result<Payload, NodeError> {
        let settings: ReportSettings = fields::parse_config(config)?;

        let rows = match inputs.remove("rows") {
            Some(Value::Array(rows)) => rows,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(NodeError::invalid_input(
                    "rows",
                    format!("expected an array, got {}", fields::type_name(&other)),
                ))
            }
        };

        let mut sections = Map::new();
        for name in SECTIONS {
            if let Some(v) = inputs.remove(name).filter(|v| !v.is_null()) {
                sections.insert(name.to_string(), v);
            }
        }

        let document = ReportDocument {
            title: settings.title.clone(),
            report_name: settings.report_name.clone(),
            columns: Self::columns(&settings, inputs.remove("columns"), &rows),
            rows,
            sections,
        };

        let rendered = self.renderer.render(&document).await?;
        info!(
            node_id = %ctx.node_id,
            file = %rendered.file_name,
            rows = rendered.row_count,
            "rendered report"
        );

        let report = serde_json::to_value(&rendered).map_err(|e| NodeError::Collaborator {
            collaborator: "report renderer",
            message: e.to_string(),
        })?;
        let mut out = Payload::new();
        out.insert("report".into(), report);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{JsonReportRenderer, RenderedReport};
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        ExecutionContext { run_id: uuid::Uuid::new_v4(), node_id: "out".into() }
    }

    fn payload(v: Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn transformation_derives_standard_fields() {
        let out = DataTransformationNode
            .execute(
                payload(json!({ "invoices": [
                    { "id": 1, "vendor_name": "Acme", "invoice_number": "INV-1",
                      "inr_amount": 118.0, "tax_amount": 18.0, "paid_amount": 18.0 },
                ]})),
                &Payload::new(),
                &ctx(),
            )
            .await
            .unwrap();
        let row = &out["rows"][0];
        assert_eq!(row["party_name"], "Acme");
        assert_eq!(row["invoice_no"], "INV-1");
        assert_eq!(row["sub_total"], 100.0);
        assert_eq!(row["outstanding"], 100.0);
        assert_eq!(row["status"], "Partial");
    }

    #[tokio::test]
    async fn transformation_projects_configured_columns() {
        let out = DataTransformationNode
            .execute(
                payload(json!({ "invoices": [{ "id": 1, "inr_amount": 10.0, "extra": true }] })),
                &payload(json!({ "columns": [
                    { "field": "trans_id", "label": "ID" },
                    { "field": "missing", "label": "Missing" },
                ]})),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out["rows"][0], json!({ "trans_id": 1, "missing": null }));
        assert_eq!(out["columns"][0]["label"], "ID");
    }

    #[tokio::test]
    async fn report_collects_rows_and_sections() {
        let node = ExcelReportNode::new(Arc::new(JsonReportRenderer));
        let out = node
            .execute(
                payload(json!({
                    "rows": [{ "a": 1 }, { "a": 2 }],
                    "summary": { "total_records": 2 },
                    "totals": null,
                })),
                &payload(json!({ "title": "AP Aging", "report_name": "ap_aging" })),
                &ctx(),
            )
            .await
            .unwrap();

        let rendered: RenderedReport = serde_json::from_value(out["report"].clone()).unwrap();
        assert_eq!(rendered.file_name, "ap_aging.json");
        assert_eq!(rendered.row_count, 2);
        let content = rendered.content.unwrap();
        assert_eq!(content["columns"], json!([{ "field": "a", "label": "a" }]));
        assert_eq!(content["sections"], json!({ "summary": { "total_records": 2 } }));
    }

    #[tokio::test]
    async fn report_rejects_non_array_rows() {
        let node = ExcelReportNode::new(Arc::new(JsonReportRenderer));
        let err = node
            .execute(payload(json!({ "rows": 3 })), &Payload::new(), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput { .. }));
    }
}
