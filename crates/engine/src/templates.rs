//! Built-in report templates.
//!
//! A template is the ordered skeleton of a pipeline: node types, their
//! configuration (with `{{ parameter }}` placeholders) and binding wiring.
//! The planner instantiates one per request.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::{ExecutionPolicy, InputBinding};

pub const ACCOUNTS_PAYABLE: &str = "accounts_payable";
pub const ACCOUNTS_RECEIVABLE: &str = "accounts_receivable";

/// One node of a template; `config` may hold placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateNode {
    pub id: String,
    pub node_type: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub inputs: Vec<InputBinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportTemplate {
    pub domain: String,
    pub report_type: String,
    /// Name given to planned definitions.
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub policy: ExecutionPolicy,
    pub nodes: Vec<TemplateNode>,
    pub terminals: Vec<String>,
}

fn node(id: &str, node_type: &str, config: Value, inputs: &[(&str, &str, &str)]) -> TemplateNode {
    TemplateNode {
        id: id.into(),
        node_type: node_type.into(),
        config,
        inputs: inputs
            .iter()
            .map(|(input, from, output)| InputBinding::new(*input, *from, *output))
            .collect(),
    }
}

fn template(
    domain: &str,
    report_type: &str,
    name: &str,
    description: &str,
    nodes: Vec<TemplateNode>,
    terminal: &str,
) -> ReportTemplate {
    ReportTemplate {
        domain: domain.into(),
        report_type: report_type.into(),
        name: name.into(),
        description: description.into(),
        policy: ExecutionPolicy::FailFast,
        nodes,
        terminals: vec![terminal.into()],
    }
}

/// Invoice fetch configuration shared by every template.
fn fetch(category: &str) -> TemplateNode {
    node(
        "fetch",
        "invoice_fetch",
        json!({
            "category": category,
            "company_id": "{{ company_id }}",
            "date_from": "{{ date_from }}",
            "date_to": "{{ date_to }}",
            "date_field": "{{ date_field }}",
            "status": "{{ status }}",
            "entity_ids": "{{ entity_ids }}",
            "amount_min": "{{ amount_min }}",
            "amount_max": "{{ amount_max }}",
            "quality_threshold": "{{ quality_threshold }}",
            "strict_validation": "{{ strict_validation }}",
        }),
        &[],
    )
}

fn party_columns(party_label: &str) -> Value {
    json!([
        { "field": "invoice_no", "label": "Invoice No" },
        { "field": "party_name", "label": party_label },
        { "field": "invoice_date", "label": "Invoice Date" },
        { "field": "due_date", "label": "Due Date" },
        { "field": "net_amt", "label": "Net Amount" },
        { "field": "paid_amt", "label": "Paid" },
        { "field": "outstanding", "label": "Outstanding" },
        { "field": "aging_days", "label": "Aging Days" },
        { "field": "aging_bucket", "label": "Bucket" },
        { "field": "status", "label": "Status" },
    ])
}

fn aging(domain: &str, category: &str, prefix: &str, party: &str, title: &str) -> ReportTemplate {
    template(
        domain,
        "aging",
        &format!("{prefix}_aging"),
        &format!("{title} aging by bucket"),
        vec![
            fetch(category),
            node("outstanding", "outstanding_calculator", json!({}), &[("invoices", "fetch", "invoices")]),
            node(
                "aging",
                "aging_calculator",
                json!({ "as_of_date": "{{ as_of_date }}" }),
                &[("invoices", "outstanding", "invoices")],
            ),
            node(
                "open_only",
                "filter",
                json!({ "conditions": [{ "field": "outstanding", "operator": ">", "value": 0 }] }),
                &[("invoices", "aging", "invoices")],
            ),
            node(
                "sort",
                "sort",
                json!({ "sort_by": [{ "field": "aging_days", "order": "desc" }] }),
                &[("invoices", "open_only", "invoices")],
            ),
            node("group", "grouping", json!({ "group_by": "aging_bucket" }), &[("invoices", "sort", "invoices")]),
            node("summary", "summary", json!({}), &[("groups", "group", "groups")]),
            node(
                "format",
                "data_transformation",
                json!({ "columns": party_columns(party) }),
                &[("invoices", "sort", "invoices")],
            ),
            node(
                "report",
                "excel_report",
                json!({
                    "title": format!("{title} Aging Report{{% if as_of_date %}} as of {{{{ as_of_date }}}}{{% endif %}}"),
                    "report_name": format!("{prefix}_aging"),
                }),
                &[
                    ("rows", "format", "rows"),
                    ("columns", "format", "columns"),
                    ("groups", "group", "groups"),
                    ("summary", "summary", "summary"),
                ],
            ),
        ],
        "report",
    )
}

fn overdue(domain: &str, category: &str, prefix: &str, report_type: &str, party: &str, title: &str) -> ReportTemplate {
    template(
        domain,
        report_type,
        &format!("{prefix}_{report_type}"),
        &format!("{title} past due, with SLA breach severity"),
        vec![
            fetch(category),
            node("outstanding", "outstanding_calculator", json!({}), &[("invoices", "fetch", "invoices")]),
            node(
                "aging",
                "aging_calculator",
                json!({ "as_of_date": "{{ as_of_date }}" }),
                &[("invoices", "outstanding", "invoices")],
            ),
            node(
                "overdue_only",
                "filter",
                json!({ "conditions": [
                    { "field": "outstanding", "operator": ">", "value": 0 },
                    { "field": "overdue_days", "operator": ">", "value": 0 },
                ]}),
                &[("invoices", "aging", "invoices")],
            ),
            node(
                "sla",
                "sla_checker",
                json!({ "sla_days": "{{ sla_days }}", "as_of_date": "{{ as_of_date }}" }),
                &[("invoices", "overdue_only", "invoices")],
            ),
            node(
                "sort",
                "sort",
                json!({ "sort_by": [{ "field": "overdue_days", "order": "desc" }] }),
                &[("invoices", "sla", "invoices")],
            ),
            node("totals", "totals_calculator", json!({}), &[("invoices", "sort", "invoices")]),
            node(
                "format",
                "data_transformation",
                json!({ "columns": party_columns(party) }),
                &[("invoices", "sort", "invoices")],
            ),
            node(
                "report",
                "excel_report",
                json!({
                    "title": format!("{title} Overdue Report"),
                    "report_name": format!("{prefix}_{report_type}"),
                }),
                &[
                    ("rows", "format", "rows"),
                    ("columns", "format", "columns"),
                    ("totals", "totals", "totals"),
                ],
            ),
        ],
        "report",
    )
}

fn register(domain: &str, category: &str, prefix: &str, party: &str, title: &str) -> ReportTemplate {
    template(
        domain,
        "register",
        &format!("{prefix}_register"),
        &format!("{title} invoice register with totals"),
        vec![
            fetch(category),
            node("outstanding", "outstanding_calculator", json!({}), &[("invoices", "fetch", "invoices")]),
            node(
                "sort",
                "sort",
                json!({ "sort_by": "{{ sort_by }}" }),
                &[("invoices", "outstanding", "invoices")],
            ),
            node("totals", "totals_calculator", json!({}), &[("invoices", "sort", "invoices")]),
            node(
                "format",
                "data_transformation",
                json!({ "columns": party_columns(party) }),
                &[("invoices", "sort", "invoices")],
            ),
            node(
                "report",
                "excel_report",
                json!({
                    "title": format!("{title} Register"),
                    "report_name": format!("{prefix}_register"),
                }),
                &[
                    ("rows", "format", "rows"),
                    ("columns", "format", "columns"),
                    ("totals", "totals", "totals"),
                ],
            ),
        ],
        "report",
    )
}

fn duplicates() -> ReportTemplate {
    template(
        ACCOUNTS_PAYABLE,
        "duplicates",
        "ap_duplicates",
        "Purchase invoices that look like duplicates",
        vec![
            fetch("purchase"),
            node(
                "detect",
                "duplicate_detector",
                json!({ "tolerance": "{{ tolerance }}" }),
                &[("invoices", "fetch", "invoices")],
            ),
            node(
                "report",
                "excel_report",
                json!({ "title": "Duplicate Invoice Report", "report_name": "ap_duplicates" }),
                &[("rows", "detect", "rows"), ("duplicates", "detect", "exact_duplicates")],
            ),
        ],
        "report",
    )
}

/// Every built-in template.
pub fn builtin_templates() -> Vec<ReportTemplate> {
    vec![
        aging(ACCOUNTS_PAYABLE, "purchase", "ap", "Vendor", "Accounts Payable"),
        overdue(ACCOUNTS_PAYABLE, "purchase", "ap", "overdue", "Vendor", "Accounts Payable"),
        register(ACCOUNTS_PAYABLE, "purchase", "ap", "Vendor", "Accounts Payable"),
        duplicates(),
        aging(ACCOUNTS_RECEIVABLE, "sales", "ar", "Customer", "Accounts Receivable"),
        overdue(ACCOUNTS_RECEIVABLE, "sales", "ar", "collection", "Customer", "Accounts Receivable"),
        register(ACCOUNTS_RECEIVABLE, "sales", "ar", "Customer", "Accounts Receivable"),
    ]
}
