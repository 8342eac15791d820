use crate::source::SourceError;
use crate::transport::TransportError;
use thiserror::Error;
use weir_protocol::{Engine, ParseError, Strategy};
use weir_sinks::SinkError;

/// Invalid job definition. Raised by [`JobBuilder::build`](crate::JobBuilder::build),
/// never during a run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Cannot supply both '{0}' and '{1}'")]
    MutuallyExclusive(&'static str, &'static str),

    #[error("Column hashing requires data cleaning to be enabled")]
    HashWithoutCleaning,

    #[error("Unknown hash algorithm: {0}")]
    UnknownHashAlgorithm(String),

    #[error("Engine '{0}' does not support a target database")]
    DatabaseNotSupported(Engine),

    #[error(
        "Incremental loads need merge keys: set merge_on, primary_key, \
         or mark a primary key in the column definition"
    )]
    IncrementalWithoutKeys,

    #[error("This source requires an explicit column definition")]
    ColumnsRequired,

    #[error("Strategy '{0}' is not supported by this source")]
    StrategyNotSupported(Strategy),

    #[error("Relative offset '{0}' must not be negative")]
    NegativeOffset(&'static str),

    #[error("An explicit resource key cannot be combined with '{0}'")]
    KeyWithWindow(&'static str),

    #[error("Merge key '{0}' is not in the column definition")]
    UnknownMergeKey(String),

    #[error("Invalid value: {0}")]
    Invalid(#[from] ParseError),
}

/// Failure of one instance. Every variant aborts the instance without
/// committing.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Merge key '{key}' does not exist in the columns of '{table}'")]
    KeyResolution { key: String, table: String },

    #[error("Chunk {chunk} failed to write: {source}")]
    Write {
        chunk: u32,
        #[source]
        source: SinkError,
    },

    #[error("Source extraction failed: {0}")]
    Connector(#[from] SourceError),

    #[error("Index on '{column}' could not be created: {source}")]
    IndexCreation {
        column: String,
        #[source]
        source: SinkError,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cancelled")]
    Cancelled,

    #[error("Target store error: {0}")]
    Store(#[source] SinkError),
}
