//! weir: paired full-refresh / incremental ELT pipelines.
//!
//! A pipeline file ([`PipelineConfig`]) names a schedule, a source, a target
//! and the tables to load. [`InstanceExecutor`] runs one scheduled instance
//! of either cadence against the run registry.

pub mod config;
pub mod executor;

pub use config::{PipelineConfig, TableConfig};
pub use executor::{InstanceExecutor, InstanceOutcome, TableFailure};
