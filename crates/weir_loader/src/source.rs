//! Source connector interface.

use crate::transport::Endpoint;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use weir_protocol::{RecordBatch, Strategy, Watermark};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid source configuration: {0}")]
    Config(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

/// What a connector can do; checked when a job is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCapabilities {
    pub strategies: Vec<Strategy>,
    /// Whether jobs must supply an explicit column definition.
    pub requires_columns: bool,
}

impl Default for SourceCapabilities {
    fn default() -> Self {
        Self {
            strategies: vec![Strategy::FullRefresh, Strategy::Incremental, Strategy::Append],
            requires_columns: false,
        }
    }
}

impl SourceCapabilities {
    pub fn supports(&self, strategy: Strategy) -> bool {
        self.strategies.contains(&strategy)
    }
}

/// What to extract: a time window or one named resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractRequest {
    Window(Watermark),
    Key(String),
}

/// Lazy, finite stream of batches. Not restartable: after an error the
/// whole request has to be extracted again.
#[async_trait]
pub trait BatchReader: Send {
    async fn next_batch(&mut self) -> Result<Option<RecordBatch>, SourceError>;
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::default()
    }

    /// `endpoint` is the resolved (possibly tunnelled) address of the source.
    async fn extract(
        &self,
        endpoint: &Endpoint,
        request: &ExtractRequest,
    ) -> Result<Box<dyn BatchReader>, SourceError>;
}
