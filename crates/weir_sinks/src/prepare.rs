//! Turn records into text rows ready for binding into a stage table.

use crate::dialect::Dialect;
use std::collections::HashMap;
use weir_protocol::{Columns, HashSpec, Record, Value};

/// Rows aligned with the column order they were prepared for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl PreparedRows {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Keep only the last row for each key. Order of survivors is preserved.
    pub fn dedupe_last_by(&mut self, keys: &[String]) {
        let key_idx: Vec<usize> = keys
            .iter()
            .filter_map(|k| self.columns.iter().position(|c| c == k))
            .collect();
        if key_idx.is_empty() {
            return;
        }
        let mut last: HashMap<Vec<Option<String>>, usize> = HashMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            let key = key_idx.iter().map(|&k| row[k].clone()).collect();
            last.insert(key, i);
        }
        let rows = std::mem::take(&mut self.rows);
        self.rows = rows
            .into_iter()
            .enumerate()
            .filter(|(i, row)| {
                let key: Vec<Option<String>> = key_idx.iter().map(|&k| row[k].clone()).collect();
                last.get(&key) == Some(i)
            })
            .map(|(_, row)| row)
            .collect();
    }
}

/// Render `records` as text rows in `columns` order.
///
/// Fields missing from a record become NULL. Hashed columns (flagged in
/// `columns` or named in `hash`) are replaced by their digest; NULL stays
/// NULL. With `clean`, NUL characters are stripped from every value.
pub fn prepare_rows(
    records: &[Record],
    columns: &Columns,
    hash: Option<&HashSpec>,
    clean: bool,
    dialect: &dyn Dialect,
) -> PreparedRows {
    let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    let hashed: Vec<bool> = columns
        .iter()
        .map(|c| c.hashed || hash.is_some_and(|h| h.applies_to(&c.name)))
        .collect();
    let algorithm = hash.map(|h| h.algorithm).unwrap_or_default();

    let rows = records
        .iter()
        .map(|record| {
            names
                .iter()
                .zip(&hashed)
                .map(|(name, &hash_it)| {
                    let text = match record.get(name) {
                        None | Some(Value::Null) => None,
                        Some(Value::Timestamp(ts)) => Some(dialect.render_timestamp(ts)),
                        Some(value) => value.render_text(),
                    }?;
                    let text = if clean { text.replace('\0', "") } else { text };
                    Some(if hash_it {
                        algorithm.digest(text.as_bytes())
                    } else {
                        text
                    })
                })
                .collect()
        })
        .collect();

    PreparedRows {
        columns: names,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DuckDbDialect, PostgresDialect};
    use weir_protocol::{ColumnSpec, FieldType, HashAlgorithm};

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn missing_fields_are_null_and_order_follows_columns() {
        let columns = Columns::new()
            .with(ColumnSpec::new("b", FieldType::Text))
            .with(ColumnSpec::new("a", FieldType::Integer));
        let prepared = prepare_rows(
            &[record(&[("a", Value::from(1))])],
            &columns,
            None,
            true,
            &PostgresDialect,
        );
        assert_eq!(prepared.columns, vec!["b", "a"]);
        assert_eq!(prepared.rows, vec![vec![None, Some("1".to_string())]]);
    }

    #[test]
    fn hashes_configured_columns_but_not_nulls() {
        let columns = Columns::new()
            .with(ColumnSpec::new("email", FieldType::Text))
            .with(ColumnSpec::new("phone", FieldType::Text));
        let spec = HashSpec::new(vec!["email".into(), "phone".into()], HashAlgorithm::Sha256);
        let prepared = prepare_rows(
            &[record(&[("email", Value::from("abc"))])],
            &columns,
            Some(&spec),
            true,
            &DuckDbDialect,
        );
        assert_eq!(
            prepared.rows[0][0].as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(prepared.rows[0][1], None);
    }

    #[test]
    fn cleaning_strips_nul_bytes() {
        let columns = Columns::new().with(ColumnSpec::new("s", FieldType::Text));
        let dirty = [record(&[("s", Value::from("a\0b"))])];

        let cleaned = prepare_rows(&dirty, &columns, None, true, &PostgresDialect);
        assert_eq!(cleaned.rows[0][0].as_deref(), Some("ab"));
        let raw = prepare_rows(&dirty, &columns, None, false, &PostgresDialect);
        assert_eq!(raw.rows[0][0].as_deref(), Some("a\0b"));
    }

    #[test]
    fn nested_values_render_as_json_text() {
        let columns = Columns::new().with(ColumnSpec::new("j", FieldType::Json));
        let prepared = prepare_rows(
            &[record(&[("j", Value::from(serde_json::json!({"k": [1, 2]})))])],
            &columns,
            None,
            true,
            &PostgresDialect,
        );
        assert_eq!(prepared.rows[0][0].as_deref(), Some(r#"{"k":[1,2]}"#));
    }

    #[test]
    fn dedupe_keeps_last_occurrence() {
        let mut prepared = PreparedRows {
            columns: vec!["id".into(), "v".into()],
            rows: vec![
                vec![Some("1".into()), Some("old".into())],
                vec![Some("2".into()), Some("x".into())],
                vec![Some("1".into()), Some("new".into())],
            ],
        };
        prepared.dedupe_last_by(&["id".to_string()]);
        assert_eq!(
            prepared.rows,
            vec![
                vec![Some("2".into()), Some("x".into())],
                vec![Some("1".into()), Some("new".into())],
            ]
        );
    }
}
