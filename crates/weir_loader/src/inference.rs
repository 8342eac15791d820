//! Column definitions inferred from record batches.

use std::collections::HashSet;
use tracing::warn;
use weir_protocol::{ColumnSpec, Columns, FieldType, RecordBatch, Value};

/// Result of inference. Columns appear in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferredSchema {
    pub columns: Columns,
    /// Fields that degraded to [`FieldType::Inconsistent`].
    pub inconsistent: Vec<String>,
}

/// Types each field from its first non-null value. A later value of a
/// different type marks the field inconsistent for good. Never fails.
#[derive(Debug, Clone, Default)]
pub struct SchemaInferencer {
    exclude: HashSet<String>,
    hashed: HashSet<String>,
}

impl SchemaInferencer {
    pub fn new(exclude: &[String], hashed: &[String]) -> Self {
        Self {
            exclude: exclude.iter().cloned().collect(),
            hashed: hashed.iter().cloned().collect(),
        }
    }

    /// Excluded fields are nulled in place and left out of the result.
    pub fn infer(&self, batches: &mut [RecordBatch]) -> InferredSchema {
        let mut schema = InferredSchema::default();

        for batch in batches.iter_mut() {
            for record in batch.records_mut() {
                for (field, value) in record.iter_mut() {
                    if self.exclude.contains(field) {
                        *value = Value::Null;
                        continue;
                    }
                    if self.hashed.contains(field) {
                        if !schema.columns.contains(field) {
                            schema.columns.insert(ColumnSpec::new(field.clone(), FieldType::Text).hashed());
                        }
                        continue;
                    }
                    let Some(observed) = value.field_type() else {
                        continue;
                    };
                    match schema.columns.get_mut(field) {
                        None => schema.columns.insert(ColumnSpec::new(field.clone(), observed)),
                        Some(spec) if spec.field_type == FieldType::Inconsistent => {}
                        Some(spec) if spec.field_type != observed => {
                            warn!(
                                column = %field,
                                first = %spec.field_type,
                                observed = %observed,
                                "inconsistent data types; storing column as text"
                            );
                            spec.field_type = FieldType::Inconsistent;
                            schema.inconsistent.push(field.clone());
                        }
                        Some(_) => {}
                    }
                }
            }
        }
        schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(rows: Vec<serde_json::Value>) -> RecordBatch {
        RecordBatch::from_json_rows(rows)
    }

    #[test]
    fn conflicting_types_degrade_to_inconsistent() {
        let mut batches = vec![batch(vec![json!({"a": 1})]), batch(vec![json!({"a": "x"})])];
        let schema = SchemaInferencer::default().infer(&mut batches);
        assert_eq!(schema.columns.get("a").unwrap().field_type, FieldType::Inconsistent);
        assert_eq!(schema.inconsistent, vec!["a".to_string()]);
    }

    #[test]
    fn inconsistent_is_terminal() {
        let mut batches = vec![batch(vec![
            json!({"a": 1}),
            json!({"a": "x"}),
            json!({"a": 2}),
            json!({"a": true}),
        ])];
        let schema = SchemaInferencer::default().infer(&mut batches);
        assert_eq!(schema.columns.get("a").unwrap().field_type, FieldType::Inconsistent);
        assert_eq!(schema.inconsistent.len(), 1);
    }

    #[test]
    fn nulls_do_not_decide_types() {
        let mut batches = vec![batch(vec![json!({"a": null}), json!({"a": 1.5})])];
        let schema = SchemaInferencer::default().infer(&mut batches);
        assert_eq!(schema.columns.get("a").unwrap().field_type, FieldType::Float);
    }

    #[test]
    fn excluded_fields_are_nulled_and_untyped() {
        let mut batches = vec![batch(vec![json!({"id": 1, "secret": "s3cr3t"})])];
        let schema = SchemaInferencer::new(&["secret".into()], &[]).infer(&mut batches);
        assert!(!schema.columns.contains("secret"));
        assert_eq!(batches[0].records()[0].get("secret"), Some(&Value::Null));
    }

    #[test]
    fn hashed_fields_are_text_regardless_of_values() {
        let mut batches = vec![batch(vec![json!({"ssn": 123}), json!({"ssn": "x"})])];
        let schema = SchemaInferencer::new(&[], &["ssn".into()]).infer(&mut batches);
        let spec = schema.columns.get("ssn").unwrap();
        assert_eq!(spec.field_type, FieldType::Text);
        assert!(spec.hashed);
        assert!(schema.inconsistent.is_empty());
    }
}
