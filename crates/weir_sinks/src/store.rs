use crate::error::SinkError;
use async_trait::async_trait;
use weir_protocol::{ColumnSpec, Columns, Engine, HashSpec, Record};

/// Fully identified target table. The effective schema is `schema + suffix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTable {
    pub schema: String,
    pub suffix: String,
    pub table: String,
    /// Database/catalog qualifier, only for engines that support one.
    pub database: Option<String>,
}

impl TargetTable {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            suffix: String::new(),
            table: table.into(),
            database: None,
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn qualified_schema(&self) -> String {
        format!("{}{}", self.schema, self.suffix)
    }
}

/// How a chunk is applied to the target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    /// Drop and recreate the table, then insert.
    Replace,
    /// Update rows matching on `keys`, insert the rest.
    Merge { keys: Vec<String> },
    Append,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Replace => "replace",
            WriteMode::Merge { .. } => "merge",
            WriteMode::Append => "append",
        }
    }
}

/// One chunk to write. `records` are already stamped with run metadata.
#[derive(Debug, Clone, Copy)]
pub struct ChunkWrite<'a> {
    pub records: &'a [Record],
    pub columns: &'a Columns,
    pub table: &'a TargetTable,
    pub mode: &'a WriteMode,
    pub hash: Option<&'a HashSpec>,
    pub clean: bool,
    /// Scratch table name, unique per run and table.
    pub stage_table: &'a str,
}

/// Outcome of a schema evolution step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    pub added: Vec<ColumnSpec>,
    /// Columns dropped. Always empty unless destructive evolution was allowed.
    pub removed: Vec<String>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A connection to a target store, scoped to one run.
///
/// Every write happens inside one transaction that stays open until
/// [`commit`](TargetStore::commit) or [`rollback`](TargetStore::rollback).
/// Reads observe the run's own uncommitted writes.
#[async_trait]
pub trait TargetStore: Send {
    fn engine(&self) -> Engine;

    async fn table_exists(&mut self, table: &TargetTable) -> Result<bool, SinkError>;

    /// Add columns present in `desired` but missing in the live table. Drops
    /// live columns absent from `desired` only when `allow_destructive`.
    async fn diff_and_evolve_schema(
        &mut self,
        table: &TargetTable,
        desired: &Columns,
        allow_destructive: bool,
    ) -> Result<SchemaDiff, SinkError>;

    /// Write one chunk. Returns the number of rows written.
    async fn write_chunk(&mut self, chunk: ChunkWrite<'_>) -> Result<u64, SinkError>;

    async fn create_index_if_missing(
        &mut self,
        name: &str,
        table: &TargetTable,
        column_expr: &str,
    ) -> Result<(), SinkError>;

    async fn commit(&mut self) -> Result<(), SinkError>;

    /// Discard everything written since the last commit.
    async fn rollback(&mut self) -> Result<(), SinkError>;

    async fn close(self: Box<Self>) -> Result<(), SinkError>;
}

/// Opens target stores for a resolved endpoint URL.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn TargetStore>, SinkError>;
}

/// Connector for the built-in drivers.
#[derive(Debug, Clone, Copy)]
pub struct EngineConnector {
    pub engine: Engine,
}

impl EngineConnector {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StoreConnector for EngineConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn TargetStore>, SinkError> {
        connect_store(self.engine, url).await
    }
}

/// Open a store for `engine` at `url`.
///
/// Supported URLs: `postgres://...`, `postgresql://...`, `duckdb:<path>`
/// and `duckdb::memory:`.
pub async fn connect_store(engine: Engine, url: &str) -> Result<Box<dyn TargetStore>, SinkError> {
    match engine {
        Engine::Postgres => {
            let store = crate::postgres::PostgresStore::connect(url).await?;
            Ok(Box::new(store))
        }
        Engine::DuckDb => open_duckdb(url),
    }
}

#[cfg(feature = "duckdb")]
fn open_duckdb(url: &str) -> Result<Box<dyn TargetStore>, SinkError> {
    let path = url.strip_prefix("duckdb:").ok_or_else(|| {
        SinkError::InvalidInput(format!("Expected a duckdb: URL, got '{}'", url))
    })?;
    let store = if path == ":memory:" {
        crate::duckdb_store::DuckDbStore::open_in_memory()?
    } else {
        crate::duckdb_store::DuckDbStore::open(std::path::Path::new(path))?
    };
    Ok(Box::new(store))
}

#[cfg(not(feature = "duckdb"))]
fn open_duckdb(url: &str) -> Result<Box<dyn TargetStore>, SinkError> {
    Err(SinkError::NotAvailable(format!(
        "DuckDB support not compiled in (enable the `duckdb` feature) for '{}'",
        url
    )))
}
