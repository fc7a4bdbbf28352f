//! Domain handlers.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::QueryRequest;

/// Errors produced while answering one domain.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    #[error("no eligible instance of service {0}")]
    NoInstance(String),

    #[error("circuit open: {0}")]
    CircuitOpen(String),

    #[error("request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{service} returned status {status}")]
    Status { service: String, status: u16 },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("{0}")]
    Failed(String),
}

/// Answers queries for one domain.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    async fn handle(&self, request: &QueryRequest) -> Result<Value, DomainError>;
}

/// Adapter turning an async closure into a handler.
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> DomainHandler for FnHandler<F>
where
    F: Fn(QueryRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, DomainError>> + Send + 'static,
{
    async fn handle(&self, request: &QueryRequest) -> Result<Value, DomainError> {
        (self.0)(request.clone()).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn DomainHandler>
where
    F: Fn(QueryRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, DomainError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
