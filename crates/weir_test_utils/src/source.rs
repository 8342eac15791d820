//! A source connector that replays a fixed script of batches and failures.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use weir_loader::{
    BatchReader, Endpoint, ExtractRequest, SourceCapabilities, SourceConnector, SourceError,
};
use weir_protocol::RecordBatch;

#[derive(Debug, Clone)]
enum Step {
    Batch(RecordBatch),
    Fail(String),
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    steps: Vec<Step>,
    capabilities: SourceCapabilities,
    requests: Arc<Mutex<Vec<(Endpoint, ExtractRequest)>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch(mut self, batch: RecordBatch) -> Self {
        self.steps.push(Step::Batch(batch));
        self
    }

    /// The reader fails with `message` when it reaches this step.
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.steps.push(Step::Fail(message.into()));
        self
    }

    pub fn with_capabilities(mut self, capabilities: SourceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Every extract call seen so far.
    pub fn requests(&self) -> Vec<(Endpoint, ExtractRequest)> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

struct ScriptReader {
    steps: std::vec::IntoIter<Step>,
}

#[async_trait]
impl BatchReader for ScriptReader {
    async fn next_batch(&mut self) -> Result<Option<RecordBatch>, SourceError> {
        match self.steps.next() {
            Some(Step::Batch(batch)) => Ok(Some(batch)),
            Some(Step::Fail(message)) => Err(SourceError::Other(message)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SourceConnector for ScriptedSource {
    fn capabilities(&self) -> SourceCapabilities {
        self.capabilities.clone()
    }

    async fn extract(
        &self,
        endpoint: &Endpoint,
        request: &ExtractRequest,
    ) -> Result<Box<dyn BatchReader>, SourceError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((endpoint.clone(), request.clone()));
        }
        Ok(Box::new(ScriptReader {
            steps: self.steps.clone().into_iter(),
        }))
    }
}
