//! Canonical enums used across all crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Load strategy of a job.
/// This is the CANONICAL definition - use this everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Replace the whole target table on every run.
    FullRefresh,
    /// Merge a time window of changes into the target by key.
    Incremental,
    /// Insert every record, never update.
    Append,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::FullRefresh => "full_refresh",
            Strategy::Incremental => "incremental",
            Strategy::Append => "append",
        }
    }

    pub fn is_incremental(&self) -> bool {
        matches!(self, Strategy::Incremental)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "full_refresh" => Ok(Strategy::FullRefresh),
            "incremental" => Ok(Strategy::Incremental),
            "append" => Ok(Strategy::Append),
            _ => Err(format!(
                "Invalid strategy: '{}'. Expected: full_refresh, incremental, or append",
                s
            )),
        }
    }
}

/// Target store engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Postgres,
    DuckDb,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Postgres => "postgres",
            Engine::DuckDb => "duckdb",
        }
    }

    /// Whether tables can be qualified with a database (catalog) name.
    pub fn supports_database(&self) -> bool {
        matches!(self, Engine::DuckDb)
    }

    /// Infer the engine from a connection URL scheme.
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Engine::Postgres)
        } else if url.starts_with("duckdb:") {
            Some(Engine::DuckDb)
        } else {
            None
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Engine::Postgres),
            "duckdb" => Ok(Engine::DuckDb),
            _ => Err(format!("Invalid engine: '{}'. Expected: postgres or duckdb", s)),
        }
    }
}

/// Lifecycle of a scheduled job instance as recorded by the run registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Success => "success",
            InstanceState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Success | InstanceState::Failed)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(InstanceState::Pending),
            "running" => Ok(InstanceState::Running),
            "success" => Ok(InstanceState::Success),
            "failed" => Ok(InstanceState::Failed),
            _ => Err(format!("Invalid instance state: '{}'", s)),
        }
    }
}

/// Logical column type. `Inconsistent` marks a field whose observed values
/// disagreed; such columns are stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Json,
    Inconsistent,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamp",
            FieldType::Json => "json",
            FieldType::Inconsistent => "inconsistent",
        }
    }

    /// Types whose values are written as plain text.
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldType::Text | FieldType::Inconsistent)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "string" | "varchar" => Ok(FieldType::Text),
            "integer" | "int" | "bigint" => Ok(FieldType::Integer),
            "float" | "double" | "real" => Ok(FieldType::Float),
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "timestamp" | "timestamptz" | "datetime" => Ok(FieldType::Timestamp),
            "json" | "jsonb" => Ok(FieldType::Json),
            "inconsistent" => Ok(FieldType::Inconsistent),
            _ => Err(format!("Invalid field type: '{}'", s)),
        }
    }
}
