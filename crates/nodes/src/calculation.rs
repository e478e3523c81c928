//! Calculation nodes: pure arithmetic over invoice records.
//!
//! None of these nodes consult the clock unless `as_of_date` is left unset;
//! planners pass it explicitly so re-runs are reproducible.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeDelta, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::fields::{self, json_f64, number, round2, Record};
use crate::{ExecutableNode, ExecutionContext, InputPort, NodeCapability, NodeError, NodePorts, Payload};

pub const OUTSTANDING_CALCULATOR: &str = "outstanding_calculator";
pub const AGING_CALCULATOR: &str = "aging_calculator";
pub const SLA_CHECKER: &str = "sla_checker";
pub const DUPLICATE_DETECTOR: &str = "duplicate_detector";
pub const TOTALS_CALCULATOR: &str = "totals_calculator";

const TOTAL_FIELDS: &[&str] = &["inr_amount", "total_amount", "grand_total"];
const PAID_FIELDS: &[&str] = &["paid_amount", "received_amount"];
const TAX_FIELDS: &[&str] = &["tax_amount", "tax_total"];
const INVOICE_DATE_FIELDS: &[&str] = &["invoice_date", "document_date", "date"];

fn invoices_in_out() -> NodePorts {
    NodePorts::new(vec![InputPort::required("invoices")], &["invoices"])
}

fn single(key: &str, value: Value) -> Payload {
    let mut out = Payload::new();
    out.insert(key.into(), value);
    out
}

#[derive(Debug, Default, Deserialize)]
struct AsOf {
    #[serde(default)]
    as_of_date: Option<NaiveDate>,
}

impl AsOf {
    fn resolve(&self) -> NaiveDate {
        self.as_of_date.unwrap_or_else(|| Utc::now().date_naive())
    }
}

// ---------------------------------------------------------------------------
// Outstanding
// ---------------------------------------------------------------------------

/// Outstanding = total − paid, gross = total − tax, plus a payment status.
pub struct OutstandingCalculatorNode;

#[async_trait]
impl ExecutableNode for OutstandingCalculatorNode {
    fn type_id(&self) -> &str {
        OUTSTANDING_CALCULATOR
    }

    fn capability(&self) -> NodeCapability {
        NodeCapability::Calculate
    }

    fn ports(&self) -> NodePorts {
        invoices_in_out()
    }

    async fn execute(
        &self,
        mut inputs: Payload,
        _config: &Payload,
        ctx: &ExecutionContext,
    ) -> Result<Payload, NodeError> {
        let mut records = fields::take_records(&mut inputs, "invoices")?;

        for r in &mut records {
            let total = number(r, TOTAL_FIELDS);
            let paid = number(r, PAID_FIELDS);
            let tax = number(r, TAX_FIELDS);

            let outstanding = round2(total - paid);
            r.insert("outstanding".into(), json_f64(outstanding));
            r.insert("outstanding_amount".into(), json_f64(outstanding));
            r.insert("gross_amount".into(), json_f64(round2(total - tax)));

            let status = if paid >= total {
                "Paid"
            } else if paid <= 0.0 {
                "Unpaid"
            } else {
                "Partially Paid"
            };
            r.insert("status".into(), json!(status));
        }

        info!(node_id = %ctx.node_id, "calculated outstanding for {} invoices", records.len());
        Ok(single("invoices", fields::records_value(records)))
    }
}

// ---------------------------------------------------------------------------
// Aging
// ---------------------------------------------------------------------------

/// Bucket label for an age in days.
pub fn aging_bucket(days: i64) -> &'static str {
    match days {
        d if d <= 30 => "0-30",
        d if d <= 60 => "31-60",
        d if d <= 90 => "61-90",
        _ => "90+",
    }
}

/// Aging days since invoice date, overdue days since due date, and bucket.
pub struct AgingCalculatorNode;

#[async_trait]
impl ExecutableNode for AgingCalculatorNode {
    fn type_id(&self) -> &str {
        AGING_CALCULATOR
    }

    fn capability(&self) -> NodeCapability {
        NodeCapability::Calculate
    }

    fn ports(&self) -> NodePorts {
        invoices_in_out()
    }

    async fn execute(
        &self,
        mut inputs: Payload,
        config: &Payload,
        ctx: &ExecutionContext,
    ) -> Result<Payload, NodeError> {
        let as_of = fields::parse_config::<AsOf>(config)?.resolve();
        let mut records = fields::take_records(&mut inputs, "invoices")?;

        for r in &mut records {
            let Some(invoice_date) = fields::date(r, INVOICE_DATE_FIELDS) else {
                warn!(
                    node_id = %ctx.node_id,
                    invoice = %fields::key_string(r.get("id")),
                    "invoice has no usable date, bucket Unknown"
                );
                r.insert("aging_days".into(), json!(0));
                r.insert("overdue_days".into(), json!(0));
                r.insert("aging_bucket".into(), json!("Unknown"));
                continue;
            };

            let aging_days = (as_of - invoice_date).num_days();
            let overdue_days = fields::date(r, &["due_date"])
                .map(|due| (as_of - due).num_days())
                .unwrap_or(0);

            r.insert("aging_days".into(), json!(aging_days));
            r.insert("overdue_days".into(), json!(overdue_days));
            r.insert("aging_bucket".into(), json!(aging_bucket(aging_days)));
        }

        info!(node_id = %ctx.node_id, %as_of, "calculated aging for {} invoices", records.len());
        Ok(single("invoices", fields::records_value(records)))
    }
}

// ---------------------------------------------------------------------------
// SLA
// ---------------------------------------------------------------------------

fn default_sla_days() -> i64 {
    30
}

#[derive(Debug, Deserialize)]
struct SlaSettings {
    #[serde(default = "default_sla_days")]
    sla_days: i64,
    #[serde(flatten)]
    as_of: AsOf,
}

/// Severity of an SLA breach by days past the deadline.
pub fn sla_severity(breach_days: i64) -> &'static str {
    match breach_days {
        d if d <= 0 => "None",
        d if d <= 7 => "Low",
        d if d <= 14 => "Medium",
        d if d <= 30 => "High",
        _ => "Critical",
    }
}

/// Flags invoices whose due date plus `sla_days` has passed.
pub struct SlaCheckerNode;

#[async_trait]
impl ExecutableNode for SlaCheckerNode {
    fn type_id(&self) -> &str {
        SLA_CHECKER
    }

    fn capability(&self) -> NodeCapability {
        NodeCapability::Calculate
    }

    fn ports(&self) -> NodePorts {
        invoices_in_out()
    }

    async fn execute(
        &self,
        mut inputs: Payload,
        config: &Payload,
        ctx: &ExecutionContext,
    ) -> Result<Payload, NodeError> {
        let settings: SlaSettings = fields::parse_config(config)?;
        let today = settings.as_of.resolve();
        let mut records = fields::take_records(&mut inputs, "invoices")?;

        let grace = TimeDelta::try_days(settings.sla_days).ok_or_else(|| {
            NodeError::InvalidConfig(format!("sla_days {} is out of range", settings.sla_days))
        })?;

        for r in &mut records {
            let breach_days = match fields::date(r, &["due_date"]) {
                Some(due) => {
                    let deadline = due.checked_add_signed(grace).ok_or_else(|| {
                        NodeError::InvalidConfig(format!(
                            "sla_days {} pushes due date {due} out of range",
                            settings.sla_days
                        ))
                    })?;
                    (today - deadline).num_days().max(0)
                }
                None => 0,
            };
            r.insert("sla_breach".into(), json!(breach_days > 0));
            r.insert("breach_days".into(), json!(breach_days));
            r.insert("sla_severity".into(), json!(sla_severity(breach_days)));
        }

        info!(node_id = %ctx.node_id, "checked SLA for {} invoices", records.len());
        Ok(single("invoices", fields::records_value(records)))
    }
}

// ---------------------------------------------------------------------------
// Duplicates
// ---------------------------------------------------------------------------

fn default_tolerance() -> f64 {
    0.01
}

#[derive(Debug, Deserialize)]
struct DuplicateSettings {
    #[serde(default = "default_tolerance")]
    tolerance: f64,
}

/// Exact duplicates share party and invoice number; fuzzy duplicates share
/// party and date with amounts within `tolerance` but a different number.
pub struct DuplicateDetectorNode;

impl DuplicateDetectorNode {
    fn party(r: &Record) -> String {
        ["vendor_name", "customer_name", "vendor_id", "customer_id"]
            .iter()
            .filter_map(|k| r.get(*k))
            .find(|v| !v.is_null())
            .map(|v| fields::key_string(Some(v)))
            .unwrap_or_default()
    }

    fn invoice_number(r: &Record) -> String {
        ["invoice_number", "document_number"]
            .iter()
            .filter_map(|k| r.get(*k))
            .find(|v| !v.is_null())
            .map(|v| fields::key_string(Some(v)))
            .unwrap_or_default()
    }

    fn pair(kind: &str, confidence: u8, reason: &str, a: &Record, b: &Record) -> Value {
        json!({
            "group": [a, b],
            "confidence": confidence,
            "type": kind,
            "reason": reason,
        })
    }
}

#[async_trait]
impl ExecutableNode for DuplicateDetectorNode {
    fn type_id(&self) -> &str {
        DUPLICATE_DETECTOR
    }

    fn capability(&self) -> NodeCapability {
        NodeCapability::Calculate
    }

    fn ports(&self) -> NodePorts {
        NodePorts::new(
            vec![InputPort::required("invoices")],
            &["exact_duplicates", "fuzzy_duplicates", "rows"],
        )
    }

    async fn execute(
        &self,
        mut inputs: Payload,
        config: &Payload,
        ctx: &ExecutionContext,
    ) -> Result<Payload, NodeError> {
        let settings: DuplicateSettings = fields::parse_config(config)?;
        let records = fields::take_records(&mut inputs, "invoices")?;

        let mut exact = Vec::new();
        let mut fuzzy = Vec::new();
        let mut rows = Vec::new();
        let mut exact_index: BTreeMap<(String, String), usize> = BTreeMap::new();
        let mut fuzzy_index: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();

        for (i, r) in records.iter().enumerate() {
            let party = Self::party(r);
            let number_key = Self::invoice_number(r);
            let amount = number(r, TOTAL_FIELDS);
            let date = fields::key_string(
                INVOICE_DATE_FIELDS.iter().filter_map(|k| r.get(*k)).next(),
            );

            match exact_index.get(&(party.clone(), number_key.clone())) {
                Some(&first) => {
                    exact.push(Self::pair("exact", 100, "Same party and invoice number", &records[first], r));
                    let mut row = r.clone();
                    row.insert("duplicate_type".into(), json!("exact"));
                    row.insert("duplicate_of".into(), records[first].get("id").cloned().unwrap_or(Value::Null));
                    row.insert("confidence".into(), json!(100));
                    rows.push(Value::Object(row));
                }
                None => {
                    exact_index.insert((party.clone(), number_key.clone()), i);
                }
            }

            let bucket = fuzzy_index.entry((party, date)).or_default();
            for &j in bucket.iter() {
                let other = &records[j];
                let diff = (amount - number(other, TOTAL_FIELDS)).abs();
                if diff <= settings.tolerance && number_key != Self::invoice_number(other) {
                    fuzzy.push(Self::pair(
                        "fuzzy",
                        75,
                        "Same party, amount, and date but different invoice number",
                        other,
                        r,
                    ));
                    let mut row = r.clone();
                    row.insert("duplicate_type".into(), json!("fuzzy"));
                    row.insert("duplicate_of".into(), other.get("id").cloned().unwrap_or(Value::Null));
                    row.insert("confidence".into(), json!(75));
                    rows.push(Value::Object(row));
                }
            }
            bucket.push(i);
        }

        info!(
            node_id = %ctx.node_id,
            "detected {} exact and {} fuzzy duplicates",
            exact.len(),
            fuzzy.len()
        );

        let mut out = Payload::new();
        out.insert("exact_duplicates".into(), Value::Array(exact));
        out.insert("fuzzy_duplicates".into(), Value::Array(fuzzy));
        out.insert("rows".into(), Value::Array(rows));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Totals
// ---------------------------------------------------------------------------

/// Report-footer totals: net, tax, gross, paid and outstanding.
pub struct TotalsCalculationNode;

#[async_trait]
impl ExecutableNode for TotalsCalculationNode {
    fn type_id(&self) -> &str {
        TOTALS_CALCULATOR
    }

    fn capability(&self) -> NodeCapability {
        NodeCapability::Summarize
    }

    fn ports(&self) -> NodePorts {
        NodePorts::new(vec![InputPort::required("invoices")], &["totals"])
    }

    async fn execute(
        &self,
        mut inputs: Payload,
        _config: &Payload,
        _ctx: &ExecutionContext,
    ) -> Result<Payload, NodeError> {
        let records = fields::take_records(&mut inputs, "invoices")?;

        let (mut gross, mut tax, mut paid, mut outstanding) = (0.0, 0.0, 0.0, 0.0);
        for r in &records {
            let amount = number(r, TOTAL_FIELDS);
            let due = number(r, &["outstanding", "outstanding_amount"]);
            gross += amount;
            tax += number(r, TAX_FIELDS);
            paid += amount - due;
            outstanding += due;
        }

        let totals = json!({
            "count": records.len(),
            "invoice_amt": round2(gross - tax),
            "tax_amt": round2(tax),
            "net_amt": round2(gross),
            "paid_amt": round2(paid),
            "outstanding": round2(outstanding),
        });
        Ok(single("totals", totals))
    }
}
