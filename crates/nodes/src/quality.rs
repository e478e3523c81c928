//! Document-quality gate for parsed (OCR / extracted) documents.
//!
//! Fetch nodes run every parsed document through a [`DocumentQualityGate`]
//! before it may enter a pipeline. [`ParsedDocumentValidator`] is the
//! built-in scorer: four category scores (structure, completeness, text
//! quality, financial data) averaged into a 0–100 quality score.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fields::as_f64;

/// Outcome of assessing one parsed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Overall score in `0.0..=100.0`.
    pub score: f64,
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub category_scores: BTreeMap<String, f64>,
}

/// Scores a parsed-document payload.
pub trait DocumentQualityGate: Send + Sync {
    /// `document_type` selects type-specific required fields (`invoice`,
    /// `purchase`, `sales`); `strict` turns warnings into invalidity.
    fn assess(&self, document: &Value, document_type: Option<&str>, strict: bool) -> QualityReport;
}

// ---------------------------------------------------------------------------
// ParsedDocumentValidator
// ---------------------------------------------------------------------------

const FINANCIAL_INDICATORS: [&str; 9] = [
    "invoice", "bill", "amount", "total", "date", "vendor", "customer", "payment", "tax",
];

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d", "%d.%m.%Y"];

/// Shapes of date-like tokens looked for in raw text (`d` = ASCII digit).
const DATE_SHAPES: [&str; 3] = ["dddd-dd-dd", "dd/dd/dddd", "dd-dd-dddd"];

#[derive(Default)]
struct Category {
    errors: Vec<String>,
    warnings: Vec<String>,
    suggestions: Vec<String>,
    score: i32,
}

impl Category {
    fn new() -> Self {
        Self { score: 100, ..Default::default() }
    }

    fn final_score(&self) -> f64 {
        f64::from(self.score.max(0))
    }
}

/// Rule-based scorer for parsed financial documents.
///
/// Expects the parser's payload shape: `text`, `metadata`, `format` and an
/// optional `raw_dict` of extracted fields.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocumentValidator;

impl ParsedDocumentValidator {
    pub fn new() -> Self {
        Self
    }

    fn structure(document: &Value) -> Category {
        let mut c = Category::new();

        let missing: Vec<&str> = ["text", "metadata", "format"]
            .into_iter()
            .filter(|k| document.get(*k).is_none())
            .collect();
        if !missing.is_empty() {
            c.errors.push(format!("Missing required keys: {}", missing.join(", ")));
            c.score -= 30 * missing.len() as i32;
        }

        if let Some(text) = document.get("text") {
            let text = text.as_str().unwrap_or_default();
            if text.trim().chars().count() < 10 {
                c.errors.push("Extracted text is empty or too short".into());
                c.score -= 50;
            }
        }

        match document.get("metadata") {
            Some(Value::Object(m)) if m.is_empty() => {
                c.warnings.push("Metadata is empty".into());
                c.score -= 10;
            }
            Some(Value::Object(_)) | None => {}
            Some(_) => {
                c.warnings.push("Metadata is not a dictionary".into());
                c.score -= 10;
            }
        }
        c
    }

    fn completeness(text: &str) -> Category {
        let mut c = Category::new();

        if text.chars().count() < 100 {
            c.warnings.push("Text content is very short (< 100 characters)".into());
            c.score -= 20;
        }

        let lower = text.to_lowercase();
        let found = FINANCIAL_INDICATORS.iter().filter(|i| lower.contains(*i)).count();
        if found < 2 {
            c.warnings.push("Document doesn't contain common financial terms".into());
            c.score -= 30;
        } else if found < 4 {
            c.warnings.push("Document has few financial indicators".into());
            c.score -= 10;
        }

        if !text.chars().any(|ch| ch.is_ascii_digit()) {
            c.errors.push("No numeric data found in text".into());
            c.score -= 40;
        }

        if !DATE_SHAPES.iter().any(|shape| contains_shape(text, shape)) {
            c.warnings.push("No date pattern found in text".into());
            c.score -= 15;
        }
        c
    }

    fn text_quality(text: &str) -> Category {
        let mut c = Category::new();

        let artifacts: [(bool, &str); 4] = [
            (has_run(text, 3, |ch| ch == '|'), "Multiple pipe characters (OCR artifact)"),
            (has_run(text, 5, |ch| ch == '_'), "Multiple underscores (OCR artifact)"),
            (has_run(text, 5, char::is_whitespace), "Excessive whitespace"),
            (
                has_run(text, 10, |ch| !ch.is_ascii()),
                "Many non-ASCII characters (possible OCR errors)",
            ),
        ];
        for (found, message) in artifacts {
            if found {
                c.warnings.push(message.to_string());
                c.suggestions
                    .push(format!("Consider re-scanning or using better OCR: {message}"));
                c.score -= 10;
            }
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        let lines = text.split('\n').count();
        if lines as f64 / words.len().max(1) as f64 > 0.5 {
            c.warnings.push("Text appears highly fragmented".into());
            c.suggestions.push("Document may need better formatting or OCR".into());
            c.score -= 15;
        }

        if !words.is_empty() {
            let readable = words
                .iter()
                .filter(|w| w.chars().count() > 2 && w.chars().all(char::is_alphabetic))
                .count();
            let ratio = readable as f64 / words.len() as f64;
            if ratio < 0.3 {
                c.warnings
                    .push(format!("Low readable content ratio: {:.1}%", ratio * 100.0));
                c.score -= 20;
            }
        }
        c
    }

    fn financial(raw: &serde_json::Map<String, Value>) -> Category {
        let mut c = Category::new();

        let checks: [(&str, fn(&Value) -> bool, &str); 5] = [
            ("document_number", |v| !display(v).is_empty(), "Document number is empty"),
            ("document_date", is_valid_date, "Document date is invalid"),
            ("total_amount", is_valid_amount, "Total amount is invalid"),
            ("vendor_name", |v| display(v).chars().count() > 1, "Vendor name is too short"),
            ("customer_name", |v| display(v).chars().count() > 1, "Customer name is too short"),
        ];
        for (field, check, message) in checks {
            if let Some(value) = raw.get(field) {
                if !check(value) {
                    c.warnings.push(message.to_string());
                    c.score -= 10;
                }
            }
        }

        let amount_fields: Vec<(&String, &Value)> = raw
            .iter()
            .filter(|(k, _)| {
                let k = k.to_lowercase();
                k.contains("amount") || k.contains("total")
            })
            .collect();
        if amount_fields.is_empty() {
            c.warnings.push("No amount fields found in data".into());
            c.score -= 20;
        }
        for (field, value) in amount_fields {
            if !is_valid_amount(value) {
                c.warnings
                    .push(format!("Invalid amount in field '{field}': {}", display(value)));
                c.score -= 10;
            }
        }
        c
    }

    fn document_type(raw: &serde_json::Map<String, Value>, document_type: &str) -> Category {
        let mut c = Category::new();
        let required: &[&[&str]] = match document_type {
            "invoice" => &[
                &["document_number"],
                &["document_date"],
                &["total_amount"],
                &["vendor_name", "customer_name"],
            ],
            "purchase" => &[&["document_number"], &["document_date"], &["vendor_name"], &["total_amount"]],
            "sales" => &[&["document_number"], &["document_date"], &["customer_name"], &["total_amount"]],
            _ => &[],
        };
        for alternatives in required {
            if alternatives.iter().any(|f| raw.contains_key(*f)) {
                continue;
            }
            if let [single] = alternatives {
                c.errors.push(format!("Missing required field: {single}"));
                c.suggestions.push(format!("Document should contain '{single}'"));
            } else {
                let joined = alternatives.join(", ");
                c.errors.push(format!("Missing required field (need one of): {joined}"));
                c.suggestions.push(format!("Document should have at least one of: {joined}"));
            }
        }
        c
    }
}

impl DocumentQualityGate for ParsedDocumentValidator {
    fn assess(&self, document: &Value, document_type: Option<&str>, strict: bool) -> QualityReport {
        let text = document.get("text").and_then(Value::as_str).unwrap_or_default();
        let empty = serde_json::Map::new();
        let raw = document
            .get("raw_dict")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let mut report = QualityReport {
            score: 0.0,
            is_valid: false,
            errors: Vec::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
            category_scores: BTreeMap::new(),
        };

        let absorb = |name: Option<&str>, c: Category, report: &mut QualityReport| {
            if let Some(name) = name {
                report.category_scores.insert(name.to_string(), c.final_score());
            }
            report.errors.extend(c.errors);
            report.warnings.extend(c.warnings);
            report.suggestions.extend(c.suggestions);
        };

        absorb(Some("structure"), Self::structure(document), &mut report);
        absorb(Some("completeness"), Self::completeness(text), &mut report);
        absorb(Some("text_quality"), Self::text_quality(text), &mut report);
        if raw.is_empty() {
            report.category_scores.insert("financial_data".into(), 0.0);
            report
                .warnings
                .push("No structured data available for financial validation".into());
        } else {
            absorb(Some("financial_data"), Self::financial(raw), &mut report);
        }
        if let Some(doc_type) = document_type {
            absorb(None, Self::document_type(raw, doc_type), &mut report);
        }

        let total: f64 = report.category_scores.values().sum();
        report.score = crate::fields::round2(total / report.category_scores.len() as f64);
        report.is_valid = report.errors.is_empty() && (!strict || report.warnings.is_empty());
        report
    }
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_valid_date(value: &Value) -> bool {
    let s = display(value);
    !s.is_empty()
        && DATE_FORMATS
            .iter()
            .any(|fmt| NaiveDate::parse_from_str(&s, fmt).is_ok())
}

fn is_valid_amount(value: &Value) -> bool {
    as_f64(value).is_some_and(|v| v >= 0.0)
}

/// Whether `text` contains `n` or more consecutive chars matching `pred`.
fn has_run(text: &str, n: usize, pred: impl Fn(char) -> bool) -> bool {
    let mut run = 0;
    for ch in text.chars() {
        if pred(ch) {
            run += 1;
            if run >= n {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Whether `text` contains a token of the given shape.
fn contains_shape(text: &str, shape: &str) -> bool {
    let bytes = text.as_bytes();
    let shape = shape.as_bytes();
    bytes.windows(shape.len()).any(|w| {
        w.iter().zip(shape).all(|(b, s)| match s {
            b'd' => b.is_ascii_digit(),
            other => b == other,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn good_document() -> Value {
        json!({
            "text": "Invoice INV-1001 dated 2024-02-10 from Acme Supplies. \
                     Customer payment terms net thirty. Subtotal amount 1000.00, \
                     tax amount 180.00, total amount due 1180.00 payable to vendor.",
            "metadata": { "pages": 1 },
            "format": "pdf",
            "raw_dict": {
                "document_number": "INV-1001",
                "document_date": "2024-02-10",
                "vendor_name": "Acme Supplies",
                "total_amount": "1180.00"
            }
        })
    }

    #[test]
    fn well_formed_invoice_scores_high() {
        let report = ParsedDocumentValidator::new().assess(&good_document(), Some("purchase"), false);
        assert!(report.is_valid, "errors: {:?}", report.errors);
        assert!(report.score >= 90.0, "score was {}", report.score);
        assert_eq!(report.category_scores.len(), 4);
    }

    #[test]
    fn garbage_extraction_scores_low_and_is_invalid() {
        let doc = json!({ "text": "|||| ____", "format": "pdf" });
        let report = ParsedDocumentValidator::new().assess(&doc, Some("invoice"), false);
        assert!(!report.is_valid);
        assert!(report.score < 50.0, "score was {}", report.score);
        assert_eq!(report.category_scores["financial_data"], 0.0);
        assert!(report.errors.iter().any(|e| e.contains("Missing required keys: metadata")));
        assert!(report.errors.iter().any(|e| e.contains("need one of")));
    }

    #[test]
    fn strict_mode_rejects_warnings() {
        let mut doc = good_document();
        doc["metadata"] = json!({});
        let lenient = ParsedDocumentValidator::new().assess(&doc, None, false);
        let strict = ParsedDocumentValidator::new().assess(&doc, None, true);
        assert!(lenient.is_valid);
        assert!(!strict.is_valid);
        assert_eq!(lenient.score, strict.score);
    }

    #[test]
    fn shape_and_run_helpers() {
        assert!(contains_shape("due 10/02/2024", "dd/dd/dddd"));
        assert!(!contains_shape("due 10/2/2024", "dd/dd/dddd"));
        assert!(has_run("a     b", 5, char::is_whitespace));
        assert!(!has_run("a    b", 5, char::is_whitespace));
    }
}
