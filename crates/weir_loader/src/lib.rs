//! Per-instance loading: job definitions, extraction windows, schema
//! inference and the chunked upsert into a target store.
//!
//! A [`Runner`] executes one job for one scheduled instance. It opens the
//! instance's transports, resolves the [`Watermark`](weir_protocol::Watermark),
//! pulls record batches from a [`SourceConnector`] and feeds them through an
//! [`UpsertPipeline`], which commits exactly once at the end.

pub mod error;
pub mod files;
pub mod inference;
pub mod job;
pub mod pipeline;
pub mod runner;
pub mod source;
pub mod transport;
pub mod watermark;

pub use error::{ConfigError, LoadError};
pub use files::{CsvOptions, FileFormat, FileSource};
pub use inference::{InferredSchema, SchemaInferencer};
pub use job::{Job, JobBuilder, KeyConfig, WindowConfig};
pub use pipeline::{metadata_columns, PipelineSummary, RunMetadata, UpsertPipeline};
pub use runner::{RunContext, RunDeps, RunReport, Runner};
pub use source::{BatchReader, ExtractRequest, SourceCapabilities, SourceConnector, SourceError};
pub use transport::{DirectTransport, Endpoint, Transport, TransportError, TransportHandle};
pub use watermark::{wait_for_quiescence, InstanceTiming, WatermarkResolver};
