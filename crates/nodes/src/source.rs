//! Invoice storage contract used by fetch nodes.
//!
//! Master and transactional records live in an external store; the engine
//! only sees this trait. [`StaticInvoiceSource`] serves fixed records for
//! tests and the CLI.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{NodeError, fields::Record};

/// Which ledger an invoice belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceCategory {
    /// Vendor (accounts-payable) invoices.
    Purchase,
    /// Customer (accounts-receivable) invoices.
    Sales,
}

impl InvoiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Sales => "sales",
        }
    }
}

/// Query pushed down to the invoice store.
///
/// Finer filtering (dates, status, amounts) happens in the fetch node so the
/// behaviour is identical whatever the store supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceQuery {
    pub category: InvoiceCategory,
    pub company_id: Option<String>,
}

/// Read-only access to stored invoices.
#[async_trait]
pub trait InvoiceSource: Send + Sync {
    /// Return all invoices of the requested category for the company.
    async fn fetch_invoices(&self, query: &InvoiceQuery) -> Result<Vec<Record>, NodeError>;
}

#[async_trait]
impl<T: InvoiceSource + ?Sized> InvoiceSource for Arc<T> {
    async fn fetch_invoices(&self, query: &InvoiceQuery) -> Result<Vec<Record>, NodeError> {
        (**self).fetch_invoices(query).await
    }
}

// ---------------------------------------------------------------------------
// StaticInvoiceSource
// ---------------------------------------------------------------------------

/// An in-memory source over a fixed set of records.
///
/// Records are matched on their `category` field and, when the query names a
/// company, on `company_id`.
#[derive(Debug, Clone, Default)]
pub struct StaticInvoiceSource {
    records: Vec<Record>,
}

impl StaticInvoiceSource {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Build from a JSON array of invoice objects.
    pub fn from_json(value: serde_json::Value) -> Result<Self, NodeError> {
        let mut payload = crate::Payload::new();
        payload.insert("invoices".into(), value);
        let records = crate::fields::take_records(&mut payload, "invoices")?;
        Ok(Self::new(records))
    }
}

#[async_trait]
impl InvoiceSource for StaticInvoiceSource {
    async fn fetch_invoices(&self, query: &InvoiceQuery) -> Result<Vec<Record>, NodeError> {
        let matches = self
            .records
            .iter()
            .filter(|r| {
                r.get("category").and_then(|c| c.as_str()) == Some(query.category.as_str())
            })
            .filter(|r| match &query.company_id {
                Some(company) => {
                    crate::fields::key_string(r.get("company_id")) == *company
                }
                None => true,
            })
            .cloned()
            .collect();
        Ok(matches)
    }
}
