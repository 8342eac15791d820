//! Transports scope network access for one instance body. A transport is
//! opened after the gate passes and closed on every exit path.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to open transport to {endpoint}: {message}")]
    Open { endpoint: String, message: String },

    #[error("Failed to close transport: {0}")]
    Close(String),
}

/// Address of a source or target, as configured or as rewritten by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// An open transport. Dropping without `close` leaks the underlying resource.
#[async_trait]
pub trait TransportHandle: Send {
    /// Where connectors should connect while this handle is open.
    fn endpoint(&self) -> &Endpoint;

    async fn close(self: Box<Self>) -> Result<(), TransportError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn TransportHandle>, TransportError>;
}

/// No tunnelling; the endpoint is used as configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectTransport;

struct DirectHandle {
    endpoint: Endpoint,
}

#[async_trait]
impl TransportHandle for DirectHandle {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn close(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl Transport for DirectTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn TransportHandle>, TransportError> {
        Ok(Box::new(DirectHandle {
            endpoint: endpoint.clone(),
        }))
    }
}
