//! Untyped record values as produced by source connectors.

use crate::types::FieldType;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
    Json(serde_json::Value),
}

impl Value {
    /// Convert a JSON value. Nested arrays and objects stay JSON.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(v) => Value::Boolean(v),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            nested => Value::Json(nested),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Natural type of the value; `None` for null.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(FieldType::Boolean),
            Value::Integer(_) => Some(FieldType::Integer),
            Value::Float(_) => Some(FieldType::Float),
            Value::Timestamp(_) => Some(FieldType::Timestamp),
            Value::Text(_) => Some(FieldType::Text),
            Value::Json(_) => Some(FieldType::Json),
        }
    }

    /// Text rendering used when binding values into a store.
    pub fn render_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Boolean(v) => Some(v.to_string()),
            Value::Integer(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Timestamp(v) => Some(v.to_rfc3339_opts(SecondsFormat::Micros, false)),
            Value::Text(v) => Some(v.clone()),
            Value::Json(v) => Some(v.to_string()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::from_json(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// One record: field name to value. A missing field reads as null.
pub type Record = BTreeMap<String, Value>;

/// Convert one JSON object into a record. Anything else is handed back.
pub fn record_from_json(row: serde_json::Value) -> Result<Record, serde_json::Value> {
    match row {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, Value::from_json(v)))
            .collect()),
        other => Err(other),
    }
}

/// Ordered batch of records, consumed in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    records: Vec<Record>,
}

impl RecordBatch {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Build a batch from JSON objects. Non-object rows are skipped; sources
    /// that must not lose rows use [`record_from_json`] instead.
    pub fn from_json_rows(rows: Vec<serde_json::Value>) -> Self {
        let records = rows
            .into_iter()
            .filter_map(|row| record_from_json(row).ok())
            .collect();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut Vec<Record> {
        &mut self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }
}

impl From<Vec<Record>> for RecordBatch {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn from_json_keeps_integers_integral() {
        assert_eq!(Value::from_json(json!(3)), Value::Integer(3));
        assert_eq!(Value::from_json(json!(3.5)), Value::Float(3.5));
        assert_eq!(Value::from_json(json!({"a": 1})).field_type(), Some(FieldType::Json));
    }

    #[test]
    fn render_text_formats_timestamps_in_utc() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        assert_eq!(
            Value::from(ts).render_text().unwrap(),
            "2024-01-01T12:30:00.000000+00:00"
        );
        assert_eq!(Value::Null.render_text(), None);
    }

    #[test]
    fn record_from_json_hands_back_non_objects() {
        let record = record_from_json(json!({"id": 1, "tags": ["a"]})).unwrap();
        assert_eq!(record.get("id"), Some(&Value::Integer(1)));
        assert_eq!(record_from_json(json!("three")).unwrap_err(), json!("three"));
    }

    #[test]
    fn from_json_rows_skips_scalars() {
        let batch = RecordBatch::from_json_rows(vec![json!({"a": 1}), json!(5), json!({"b": "x"})]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records()[1].get("b"), Some(&Value::from("x")));
    }
}
