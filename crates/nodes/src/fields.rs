//! Helpers for reading invoice records and node configuration.
//!
//! Records are loosely-shaped JSON objects coming from different sources, so
//! most readers accept several field names and fall back to a default.

use chrono::{DateTime, NaiveDate};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{NodeError, Payload};

/// A single invoice record.
pub type Record = Map<String, Value>;

/// Deserialize a node's configuration map into a typed settings struct.
pub fn parse_config<T: DeserializeOwned>(config: &Payload) -> Result<T, NodeError> {
    serde_json::from_value(Value::Object(config.clone()))
        .map_err(|e| NodeError::InvalidConfig(e.to_string()))
}

/// Take the array bound to `key` and return its object elements.
///
/// Non-object elements are rejected rather than silently dropped.
pub fn take_records(inputs: &mut Payload, key: &str) -> Result<Vec<Record>, NodeError> {
    match inputs.remove(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(obj) => Ok(obj),
                other => Err(NodeError::invalid_input(
                    key,
                    format!("element {i} is not an object: {other}"),
                )),
            })
            .collect(),
        Some(other) => Err(NodeError::invalid_input(
            key,
            format!("expected an array, got {}", type_name(&other)),
        )),
    }
}

/// Wrap records back into a JSON array.
pub fn records_value(records: Vec<Record>) -> Value {
    Value::Array(records.into_iter().map(Value::Object).collect())
}

/// First of `keys` that holds a usable number (numbers or numeric strings).
///
/// Zero values are skipped so that e.g. an `inr_amount` of 0 falls through
/// to `total_amount`, matching how upstream extraction fills fields.
pub fn number(record: &Record, keys: &[&str]) -> f64 {
    keys.iter()
        .filter_map(|k| record.get(*k).and_then(as_f64))
        .find(|v| *v != 0.0)
        .unwrap_or(0.0)
}

pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .replace([',', '$', '₹'], "")
            .trim()
            .parse::<f64>()
            .ok(),
        _ => None,
    }
}

/// First of `keys` that holds a parseable date.
pub fn date(record: &Record, keys: &[&str]) -> Option<NaiveDate> {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find(|v| !v.is_null())
        .and_then(parse_date)
}

/// Parse `YYYY-MM-DD` or an RFC 3339 timestamp.
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive()))
        .or_else(|| {
            s.get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        })
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// JSON number from an `f64`, mapping non-finite values to `null`.
pub fn json_f64(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Display key for grouping and duplicate matching.
pub fn key_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "Unknown".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
