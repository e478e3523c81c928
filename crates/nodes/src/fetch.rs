//! `invoice_fetch`: retrieves invoices and gates parsed documents.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::fields::{self, Record};
use crate::quality::DocumentQualityGate;
use crate::source::{InvoiceCategory, InvoiceQuery, InvoiceSource};
use crate::{ExecutableNode, ExecutionContext, NodeCapability, NodeError, NodePorts, Payload};

pub const INVOICE_FETCH: &str = "invoice_fetch";

/// Records carrying this key hold the parser output they were extracted from.
pub const PARSED_DOCUMENT_KEY: &str = "parsed_document";

fn default_date_field() -> String {
    "created_at".into()
}

fn default_threshold() -> f64 {
    70.0
}

#[derive(Debug, Deserialize)]
struct FetchSettings {
    category: InvoiceCategory,
    #[serde(default)]
    company_id: Option<Value>,
    #[serde(default)]
    date_from: Option<NaiveDate>,
    #[serde(default)]
    date_to: Option<NaiveDate>,
    #[serde(default = "default_date_field")]
    date_field: String,
    #[serde(default)]
    status: Vec<String>,
    #[serde(default)]
    entity_ids: Vec<Value>,
    #[serde(default)]
    amount_min: Option<f64>,
    #[serde(default)]
    amount_max: Option<f64>,
    #[serde(default = "default_threshold")]
    quality_threshold: f64,
    #[serde(default)]
    strict_validation: bool,
    #[serde(default)]
    document_type: Option<String>,
}

impl FetchSettings {
    fn admits(&self, record: &Record) -> bool {
        // Undated records never satisfy a date bound.
        if self.date_from.is_some() || self.date_to.is_some() {
            let Some(d) = fields::date(record, &[self.date_field.as_str()]) else {
                return false;
            };
            if self.date_from.is_some_and(|from| d < from) || self.date_to.is_some_and(|to| d > to) {
                return false;
            }
        }

        if !self.status.is_empty() {
            let status = record.get("payment_status").and_then(Value::as_str);
            if !status.is_some_and(|s| self.status.iter().any(|w| w == s)) {
                return false;
            }
        }

        if !self.entity_ids.is_empty() {
            let wanted: Vec<String> = self
                .entity_ids
                .iter()
                .map(|v| fields::key_string(Some(v)))
                .collect();
            let party = ["vendor_id", "customer_id"]
                .iter()
                .filter_map(|k| record.get(*k))
                .map(|v| fields::key_string(Some(v)));
            if !party.into_iter().any(|p| wanted.contains(&p)) {
                return false;
            }
        }

        let amount = record.get("inr_amount").and_then(fields::as_f64).unwrap_or(0.0);
        if self.amount_min.is_some_and(|min| amount < min) || self.amount_max.is_some_and(|max| amount > max) {
            return false;
        }
        true
    }
}

/// Fetches invoices of one category from an [`InvoiceSource`].
///
/// Every admitted record with a `parsed_document` is scored by the quality
/// gate; a score below `quality_threshold` (or an invalid document under
/// `strict_validation`) fails the node instead of passing bad data on.
pub struct InvoiceFetchNode {
    source: Arc<dyn InvoiceSource>,
    gate: Arc<dyn DocumentQualityGate>,
}

impl InvoiceFetchNode {
    pub fn new(source: Arc<dyn InvoiceSource>, gate: Arc<dyn DocumentQualityGate>) -> Self {
        Self { source, gate }
    }

    fn admit_document(&self, record: &mut Record, settings: &FetchSettings) -> Result<(), NodeError> {
        let Some(document) = record.remove(PARSED_DOCUMENT_KEY) else {
            return Ok(());
        };
        let doc_type = settings
            .document_type
            .as_deref()
            .unwrap_or(settings.category.as_str());
        let report = self
            .gate
            .assess(&document, Some(doc_type), settings.strict_validation);

        let below = report.score < settings.quality_threshold;
        if below || (settings.strict_validation && !report.is_valid) {
            let name = record
                .get("invoice_number")
                .or_else(|| record.get("id"))
                .map(|v| fields::key_string(Some(v)))
                .unwrap_or_else(|| "unknown".into());
            return Err(NodeError::DocumentQuality {
                document: name,
                score: report.score,
                threshold: settings.quality_threshold,
                errors: report.errors,
            });
        }

        record.insert("quality_score".into(), fields::json_f64(report.score));
        Ok(())
    }
}

#[async_trait]
impl ExecutableNode for InvoiceFetchNode {
    fn type_id(&self) -> &str {
        INVOICE_FETCH
    }

    fn capability(&self) -> NodeCapability {
        NodeCapability::Fetch
    }

    fn ports(&self) -> NodePorts {
        NodePorts::new(vec![], &["invoices"])
    }

    async fn execute(
        &self,
        _inputs: Payload,
        config: &Payload,
        ctx: &ExecutionContext,
    ) -> Result<Payload, NodeError> {
        let settings: FetchSettings = fields::parse_config(config)?;
        let query = InvoiceQuery {
            category: settings.category,
            company_id: settings
                .company_id
                .as_ref()
                .map(|v| fields::key_string(Some(v))),
        };

        let fetched = self.source.fetch_invoices(&query).await?;
        let total = fetched.len();

        let mut admitted = Vec::with_capacity(total);
        for mut record in fetched.into_iter().filter(|r| settings.admits(r)) {
            self.admit_document(&mut record, &settings)?;
            admitted.push(record);
        }

        debug!(node_id = %ctx.node_id, fetched = total, "applied invoice filters");
        info!(node_id = %ctx.node_id, category = query.category.as_str(), "fetched {} invoices", admitted.len());

        let mut out = Payload::new();
        out.insert("invoices".into(), fields::records_value(admitted));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{ParsedDocumentValidator, QualityReport};
    use crate::source::StaticInvoiceSource;
    use serde_json::json;

    struct FixedScore(f64);

    impl DocumentQualityGate for FixedScore {
        fn assess(&self, _: &Value, _: Option<&str>, _: bool) -> QualityReport {
            QualityReport {
                score: self.0,
                is_valid: true,
                errors: vec![],
                warnings: vec![],
                suggestions: vec![],
                category_scores: Default::default(),
            }
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext { run_id: uuid::Uuid::new_v4(), node_id: "fetch".into() }
    }

    fn config(v: Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    fn source() -> Arc<dyn InvoiceSource> {
        Arc::new(
            StaticInvoiceSource::from_json(json!([
                { "id": 1, "category": "purchase", "invoice_date": "2024-01-05", "payment_status": "unpaid", "vendor_id": 7, "inr_amount": 500.0 },
                { "id": 2, "category": "purchase", "invoice_date": "2024-02-20", "payment_status": "paid", "vendor_id": 8, "inr_amount": 1500.0 },
                { "id": 3, "category": "purchase", "invoice_date": "2024-03-15", "payment_status": "unpaid", "vendor_id": 7, "inr_amount": 2500.0,
                  "parsed_document": { "text": "garbage" } },
                { "id": 4, "category": "sales", "invoice_date": "2024-01-10", "customer_id": 9, "inr_amount": 100.0 },
            ]))
            .unwrap(),
        )
    }

    fn ids(out: &Payload) -> Vec<i64> {
        out["invoices"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn filters_by_date_status_entity_and_amount() {
        let node = InvoiceFetchNode::new(source(), Arc::new(FixedScore(100.0)));

        let out = node
            .execute(Payload::new(), &config(json!({
                "category": "purchase",
                "date_field": "invoice_date",
                "date_from": "2024-01-01",
                "date_to": "2024-02-28"
            })), &ctx())
            .await
            .unwrap();
        assert_eq!(ids(&out), vec![1, 2]);

        let out = node
            .execute(Payload::new(), &config(json!({
                "category": "purchase",
                "status": ["unpaid"],
                "entity_ids": ["7"],
                "amount_min": 1000
            })), &ctx())
            .await
            .unwrap();
        assert_eq!(ids(&out), vec![3]);
        assert_eq!(out["invoices"][0]["quality_score"], 100.0);
        assert!(out["invoices"][0].get(PARSED_DOCUMENT_KEY).is_none());
    }

    #[tokio::test]
    async fn undated_records_fail_a_date_bound() {
        let source: Arc<dyn InvoiceSource> = Arc::new(
            StaticInvoiceSource::from_json(json!([
                { "id": 1, "category": "purchase", "due_date": "2024-02-01" },
                { "id": 2, "category": "purchase" },
                { "id": 3, "category": "purchase", "due_date": "2024-06-01" },
            ]))
            .unwrap(),
        );
        let node = InvoiceFetchNode::new(source, Arc::new(FixedScore(100.0)));

        let bounded = node
            .execute(Payload::new(), &config(json!({
                "category": "purchase",
                "date_field": "due_date",
                "date_to": "2024-03-31"
            })), &ctx())
            .await
            .unwrap();
        assert_eq!(ids(&bounded), vec![1]);

        let unbounded = node
            .execute(Payload::new(), &config(json!({ "category": "purchase", "date_field": "due_date" })), &ctx())
            .await
            .unwrap();
        assert_eq!(ids(&unbounded), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn low_quality_document_fails_the_node() {
        let node = InvoiceFetchNode::new(source(), Arc::new(ParsedDocumentValidator::new()));
        let err = node
            .execute(Payload::new(), &config(json!({ "category": "purchase" })), &ctx())
            .await
            .unwrap_err();
        match err {
            NodeError::DocumentQuality { document, score, threshold, .. } => {
                assert_eq!(document, "3");
                assert!(score < threshold);
                assert_eq!(threshold, 70.0);
            }
            other => panic!("expected DocumentQuality, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn threshold_is_configuration() {
        let node = InvoiceFetchNode::new(source(), Arc::new(FixedScore(55.0)));
        let lenient = node
            .execute(Payload::new(), &config(json!({ "category": "purchase", "quality_threshold": 50 })), &ctx())
            .await;
        assert!(lenient.is_ok());

        let strict = node
            .execute(Payload::new(), &config(json!({ "category": "purchase", "quality_threshold": 60 })), &ctx())
            .await;
        assert!(matches!(strict, Err(NodeError::DocumentQuality { .. })));
    }

    #[tokio::test]
    async fn missing_category_is_a_config_error() {
        let node = InvoiceFetchNode::new(source(), Arc::new(FixedScore(100.0)));
        let err = node.execute(Payload::new(), &Payload::new(), &ctx()).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidConfig(_)));
    }
}
