//! A transport that counts opens and closes and can rewrite the endpoint.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weir_loader::{Endpoint, Transport, TransportError, TransportHandle};

#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    rewrite_to: Option<String>,
    fail_open: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand connectors this URL instead of the configured one.
    pub fn rewriting_to(mut self, url: impl Into<String>) -> Self {
        self.rewrite_to = Some(url.into());
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Opened and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }
}

struct RecordingHandle {
    endpoint: Endpoint,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl TransportHandle for RecordingHandle {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn close(self: Box<Self>) -> Result<(), TransportError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn TransportHandle>, TransportError> {
        if self.fail_open {
            return Err(TransportError::Open {
                endpoint: endpoint.url.clone(),
                message: "injected failure".to_string(),
            });
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let endpoint = match &self.rewrite_to {
            Some(url) => Endpoint::new(url.clone()),
            None => endpoint.clone(),
        };
        Ok(Box::new(RecordingHandle {
            endpoint,
            closed: self.closed.clone(),
        }))
    }
}
