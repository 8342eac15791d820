//! Column definitions: the resolved shape of a target table.

use crate::types::FieldType;
use serde::{Deserialize, Serialize};

/// Definition of one column. Names are case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub hashed: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            primary_key: false,
            not_null: false,
            unique: false,
            hashed: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn hashed(mut self) -> Self {
        self.hashed = true;
        self.field_type = FieldType::Text;
        self
    }
}

/// Ordered set of column definitions, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Columns {
    specs: Vec<ColumnSpec>,
}

impl Columns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a column, keeping its original position on replace.
    pub fn insert(&mut self, spec: ColumnSpec) {
        match self.specs.iter_mut().find(|s| s.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.specs.push(spec),
        }
    }

    pub fn with(mut self, spec: ColumnSpec) -> Self {
        self.insert(spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ColumnSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ColumnSpec> {
        self.specs.iter_mut().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<ColumnSpec> {
        let idx = self.specs.iter().position(|s| s.name == name)?;
        Some(self.specs.remove(idx))
    }

    pub fn names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn primary_keys(&self) -> Vec<&str> {
        self.specs
            .iter()
            .filter(|s| s.primary_key)
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl FromIterator<ColumnSpec> for Columns {
    fn from_iter<I: IntoIterator<Item = ColumnSpec>>(iter: I) -> Self {
        let mut columns = Columns::new();
        for spec in iter {
            columns.insert(spec);
        }
        columns
    }
}

impl<'a> IntoIterator for &'a Columns {
    type Item = &'a ColumnSpec;
    type IntoIter = std::slice::Iter<'a, ColumnSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.specs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_in_place() {
        let mut cols = Columns::new()
            .with(ColumnSpec::new("id", FieldType::Integer))
            .with(ColumnSpec::new("name", FieldType::Text));
        cols.insert(ColumnSpec::new("id", FieldType::Text).primary_key());

        assert_eq!(cols.names(), vec!["id", "name"]);
        assert_eq!(cols.primary_keys(), vec!["id"]);
        assert_eq!(cols.get("id").unwrap().field_type, FieldType::Text);
    }

    #[test]
    fn names_are_case_sensitive() {
        let cols = Columns::new().with(ColumnSpec::new("Id", FieldType::Integer));
        assert!(cols.contains("Id"));
        assert!(!cols.contains("id"));
    }

    #[test]
    fn hashed_forces_text() {
        let spec = ColumnSpec::new("email", FieldType::Integer).hashed();
        assert!(spec.hashed);
        assert_eq!(spec.field_type, FieldType::Text);
    }
}
