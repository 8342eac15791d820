//! Target store drivers.
//!
//! A [`TargetStore`] writes the chunks of one run inside a single open
//! transaction; nothing is visible to readers until [`TargetStore::commit`].
//! [`SqlStore`] implements the shared SQL flow (stage table, then
//! replace/merge/append into the target) on top of an engine-specific
//! [`Executor`].

pub mod dialect;
#[cfg(feature = "duckdb")]
pub mod duckdb_store;
pub mod error;
#[cfg(feature = "duckdb")]
pub mod lock;
pub mod postgres;
pub mod prepare;
pub mod sql;
pub mod sql_store;
pub mod store;

pub use dialect::{dialect_for, Dialect, DuckDbDialect, PostgresDialect};
pub use error::SinkError;
pub use prepare::{prepare_rows, PreparedRows};
pub use sql_store::{Executor, SqlStore};
pub use store::{
    connect_store, ChunkWrite, EngineConnector, SchemaDiff, StoreConnector, TargetStore,
    TargetTable, WriteMode,
};

#[cfg(feature = "duckdb")]
pub use duckdb_store::DuckDbStore;
pub use postgres::PostgresStore;
