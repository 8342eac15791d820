//! Engine-specific SQL details: identifier quoting, placeholders and types.

use chrono::{DateTime, SecondsFormat, Utc};
use weir_protocol::{Engine, FieldType};

pub trait Dialect: Send + Sync {
    fn engine(&self) -> Engine;

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Bind placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    fn column_type(&self, field_type: FieldType) -> &'static str;

    /// Text form of a timestamp that casts cleanly to [`Self::column_type`].
    fn render_timestamp(&self, ts: &DateTime<Utc>) -> String;

    /// Whether PRIMARY KEY / UNIQUE constraints are declared on created tables.
    fn declares_constraints(&self) -> bool;

    /// Upper bound on bind parameters per statement.
    fn max_params(&self) -> usize;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn column_type(&self, field_type: FieldType) -> &'static str {
        match field_type {
            FieldType::Text | FieldType::Inconsistent => "TEXT",
            FieldType::Integer => "BIGINT",
            FieldType::Float => "DOUBLE PRECISION",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Timestamp => "TIMESTAMPTZ",
            FieldType::Json => "JSONB",
        }
    }

    fn render_timestamp(&self, ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, false)
    }

    fn declares_constraints(&self) -> bool {
        true
    }

    fn max_params(&self) -> usize {
        65_535
    }
}

/// Timestamps are stored as naive UTC. Key constraints are not declared;
/// merges match on key values only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbDialect;

impl Dialect for DuckDbDialect {
    fn engine(&self) -> Engine {
        Engine::DuckDb
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn column_type(&self, field_type: FieldType) -> &'static str {
        match field_type {
            FieldType::Text | FieldType::Inconsistent | FieldType::Json => "VARCHAR",
            FieldType::Integer => "BIGINT",
            FieldType::Float => "DOUBLE",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Timestamp => "TIMESTAMP",
        }
    }

    fn render_timestamp(&self, ts: &DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }

    fn declares_constraints(&self) -> bool {
        false
    }

    fn max_params(&self) -> usize {
        999
    }
}

pub fn dialect_for(engine: Engine) -> Box<dyn Dialect> {
    match engine {
        Engine::Postgres => Box::new(PostgresDialect),
        Engine::DuckDb => Box::new(DuckDbDialect),
    }
}
