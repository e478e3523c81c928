//! Filtering, sorting, grouping and summarisation nodes.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::fields::{self, json_f64, number, round2, Record};
use crate::{ExecutableNode, ExecutionContext, InputPort, NodeCapability, NodeError, NodePorts, Payload};

pub const FILTER: &str = "filter";
pub const SORT: &str = "sort";
pub const GROUPING: &str = "grouping";
pub const SUMMARY: &str = "summary";

const AGING_BUCKET_ORDER: [&str; 5] = ["0-30", "31-60", "61-90", "90+", "Unknown"];

/// Ordering between two JSON scalars of the same kind.
///
/// Numbers compare numerically and strings lexically; mixed or structured
/// values are unordered.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Total order used for sorting: nulls first, then by kind, then by value.
fn sort_order(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    compare(a, b).unwrap_or_else(|| rank(a).cmp(&rank(b)))
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Operator {
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "in")]
    In,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Condition {
    fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);
        let ord = compare(actual, &self.value);
        match self.operator {
            Operator::Gte => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
            Operator::Lte => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
            Operator::Gt => ord == Some(Ordering::Greater),
            Operator::Lt => ord == Some(Ordering::Less),
            Operator::Eq => ord == Some(Ordering::Equal) || actual == &self.value,
            Operator::Ne => !(ord == Some(Ordering::Equal) || actual == &self.value),
            Operator::In => self
                .value
                .as_array()
                .is_some_and(|options| options.iter().any(|o| o == actual)),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FilterSettings {
    #[serde(default)]
    conditions: Vec<Condition>,
}

/// Keeps records matching every configured condition.
pub struct FilterNode;

#[async_trait]
impl ExecutableNode for FilterNode {
    fn type_id(&self) -> &str {
        FILTER
    }

    fn capability(&self) -> NodeCapability {
        NodeCapability::Filter
    }

    fn ports(&self) -> NodePorts {
        NodePorts::new(vec![InputPort::required("invoices")], &["invoices"])
    }

    async fn execute(
        &self,
        mut inputs: Payload,
        config: &Payload,
        ctx: &ExecutionContext,
    ) -> Result<Payload, NodeError> {
        let settings: FilterSettings = fields::parse_config(config)?;
        let records = fields::take_records(&mut inputs, "invoices")?;
        let before = records.len();

        let kept: Vec<Record> = records
            .into_iter()
            .filter(|r| settings.conditions.iter().all(|c| c.matches(r)))
            .collect();

        debug!(node_id = %ctx.node_id, before, after = kept.len(), "filtered records");
        let mut out = Payload::new();
        out.insert("invoices".into(), fields::records_value(kept));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Sort
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

fn default_sort_by() -> Vec<SortKey> {
    vec![SortKey { field: "invoice_date".into(), order: SortOrder::Desc }]
}

#[derive(Debug, Deserialize)]
struct SortSettings {
    #[serde(default = "default_sort_by")]
    sort_by: Vec<SortKey>,
}

/// Stable multi-key sort.
pub struct SortNode;

#[async_trait]
impl ExecutableNode for SortNode {
    fn type_id(&self) -> &str {
        SORT
    }

    fn capability(&self) -> NodeCapability {
        NodeCapability::Sort
    }

    fn ports(&self) -> NodePorts {
        NodePorts::new(vec![InputPort::required("invoices")], &["invoices"])
    }

    async fn execute(
        &self,
        mut inputs: Payload,
        config: &Payload,
        _ctx: &ExecutionContext,
    ) -> Result<Payload, NodeError> {
        let settings: SortSettings = fields::parse_config(config)?;
        let mut records = fields::take_records(&mut inputs, "invoices")?;

        records.sort_by(|a, b| {
            settings
                .sort_by
                .iter()
                .map(|key| {
                    let ord = sort_order(
                        a.get(&key.field).unwrap_or(&Value::Null),
                        b.get(&key.field).unwrap_or(&Value::Null),
                    );
                    match key.order {
                        SortOrder::Asc => ord,
                        SortOrder::Desc => ord.reverse(),
                    }
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        let mut out = Payload::new();
        out.insert("invoices".into(), fields::records_value(records));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

fn default_group_by() -> String {
    "aging_bucket".into()
}

#[derive(Debug, Deserialize)]
struct GroupingSettings {
    #[serde(default = "default_group_by")]
    group_by: String,
}

#[derive(Default)]
struct Group {
    records: Vec<Value>,
    total_amount: f64,
    total_outstanding: f64,
}

/// Groups records by a field with count and amount subtotals.
///
/// Aging buckets keep their natural order; other keys sort by name.
pub struct GroupingNode;

#[async_trait]
impl ExecutableNode for GroupingNode {
    fn type_id(&self) -> &str {
        GROUPING
    }

    fn capability(&self) -> NodeCapability {
        NodeCapability::Group
    }

    fn ports(&self) -> NodePorts {
        NodePorts::new(vec![InputPort::required("invoices")], &["groups"])
    }

    async fn execute(
        &self,
        mut inputs: Payload,
        config: &Payload,
        _ctx: &ExecutionContext,
    ) -> Result<Payload, NodeError> {
        let settings: GroupingSettings = fields::parse_config(config)?;
        let records = fields::take_records(&mut inputs, "invoices")?;

        let mut groups: BTreeMap<String, Group> = BTreeMap::new();
        for r in records {
            let key = fields::key_string(r.get(&settings.group_by));
            let group = groups.entry(key).or_default();
            group.total_amount += number(&r, &["inr_amount", "total_amount", "grand_total"]);
            group.total_outstanding += number(&r, &["outstanding", "outstanding_amount"]);
            group.records.push(Value::Object(r));
        }

        let mut ordered: Vec<(String, Group)> = groups.into_iter().collect();
        if settings.group_by == "aging_bucket" {
            ordered.sort_by_key(|(name, _)| {
                AGING_BUCKET_ORDER
                    .iter()
                    .position(|b| b == name)
                    .unwrap_or(AGING_BUCKET_ORDER.len())
            });
        }

        let groups: Vec<Value> = ordered
            .into_iter()
            .map(|(name, g)| {
                json!({
                    "group_name": name,
                    "count": g.records.len(),
                    "total_amount": round2(g.total_amount),
                    "total_outstanding": round2(g.total_outstanding),
                    "records": g.records,
                })
            })
            .collect();

        let mut out = Payload::new();
        out.insert("groups".into(), Value::Array(groups));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

fn default_amount_field() -> String {
    "inr_amount".into()
}

#[derive(Debug, Deserialize)]
struct SummarySettings {
    #[serde(default = "default_amount_field")]
    amount_field: String,
}

/// Summary statistics over either grouped output or raw records.
pub struct SummaryNode;

impl SummaryNode {
    fn from_groups(groups: &[Value]) -> Value {
        let total_amount: f64 = groups.iter().filter_map(|g| g["total_amount"].as_f64()).sum();
        let total_outstanding: f64 =
            groups.iter().filter_map(|g| g["total_outstanding"].as_f64()).sum();
        let total_records: u64 = groups.iter().filter_map(|g| g["count"].as_u64()).sum();
        let average = if total_records > 0 { total_amount / total_records as f64 } else { 0.0 };
        json!({
            "total_records": total_records,
            "total_groups": groups.len(),
            "total_amount": json_f64(round2(total_amount)),
            "total_outstanding": json_f64(round2(total_outstanding)),
            "average_amount": json_f64(round2(average)),
        })
    }

    fn from_records(records: &[Record], amount_field: &str) -> Value {
        let amounts: Vec<f64> = records.iter().map(|r| number(r, &[amount_field])).collect();
        let outstanding: Vec<f64> = records
            .iter()
            .map(|r| number(r, &["outstanding", "outstanding_amount"]))
            .collect();
        let n = records.len().max(1) as f64;
        let total: f64 = amounts.iter().sum();
        let total_outstanding: f64 = outstanding.iter().sum();
        let min = amounts.iter().copied().fold(f64::INFINITY, f64::min);
        let max = amounts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        json!({
            "total_records": records.len(),
            "total_amount": json_f64(round2(total)),
            "total_outstanding": json_f64(round2(total_outstanding)),
            "average_amount": json_f64(round2(total / n)),
            "average_outstanding": json_f64(round2(total_outstanding / n)),
            "min_amount": json_f64(if amounts.is_empty() { 0.0 } else { min }),
            "max_amount": json_f64(if amounts.is_empty() { 0.0 } else { max }),
        })
    }
}

#[async_trait]
impl ExecutableNode for SummaryNode {
    fn type_id(&self) -> &str {
        SUMMARY
    }

    fn capability(&self) -> NodeCapability {
        NodeCapability::Summarize
    }

    fn ports(&self) -> NodePorts {
        NodePorts::new(
            vec![InputPort::optional("invoices"), InputPort::optional("groups")],
            &["summary"],
        )
    }

    async fn execute(
        &self,
        mut inputs: Payload,
        config: &Payload,
        _ctx: &ExecutionContext,
    ) -> Result<Payload, NodeError> {
        let settings: SummarySettings = fields::parse_config(config)?;

        let summary = match inputs.remove("groups") {
            Some(Value::Array(groups)) => Self::from_groups(&groups),
            Some(Value::Null) | None => {
                let records = fields::take_records(&mut inputs, "invoices")?;
                Self::from_records(&records, &settings.amount_field)
            }
            Some(other) => {
                return Err(NodeError::invalid_input(
                    "groups",
                    format!("expected an array, got {}", fields::type_name(&other)),
                ))
            }
        };

        let mut out = Payload::new();
        out.insert("summary".into(), summary);
        Ok(out)
    }
}
