//! Transport abstraction for the sync protocol.
//!
//! The transport carries requests to a server and brings back responses.
//! Implementations may use HTTP or any other carrier; [`LocalTransport`]
//! drives a [`ProtocolHandler`] in-process through the same wire encoding.

use std::sync::Arc;

use async_trait::async_trait;

use lix_store::BlobBackend;

use crate::error::Result;
use crate::messages::{Request, Response};
use crate::protocol::ProtocolHandler;

/// Transport trait for delivering protocol requests.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the response.
    ///
    /// Error responses are returned as `Ok`; only delivery failures are
    /// errors here.
    async fn call(&self, request: Request) -> Result<Response>;
}

/// In-process transport for tests and embedded servers.
pub struct LocalTransport<B: BlobBackend> {
    handler: Arc<ProtocolHandler<B>>,
}

impl<B: BlobBackend> LocalTransport<B> {
    pub fn new(handler: Arc<ProtocolHandler<B>>) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &Arc<ProtocolHandler<B>> {
        &self.handler
    }
}

impl<B: BlobBackend> Clone for LocalTransport<B> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

#[async_trait]
impl<B: BlobBackend> Transport for LocalTransport<B> {
    async fn call(&self, request: Request) -> Result<Response> {
        let (operation, body) = request.encode()?;
        Ok(self.handler.handle_bytes(operation, &body).await)
    }
}
