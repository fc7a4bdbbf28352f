//! Domains answered by a registered service.
//!
//! # Responsibilities
//! - Select an eligible instance from the registry
//! - Call it through the instance circuit breaker with a deadline
//! - Report the outcome back to the registry

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::cache::QueryRequest;
use crate::orchestrator::handler::{DomainError, DomainHandler};
use crate::registry::{ServiceInstance, ServiceRegistry};
use crate::resilience::{BreakerError, BreakerManager};

/// Largest accepted response body.
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Breaker name for one instance of a service.
pub fn instance_breaker_name(service: &str, instance_id: &str) -> String {
    format!("{}/{}", service, instance_id)
}

pub struct RemoteDomain {
    service: String,
    path: String,
    registry: Arc<ServiceRegistry>,
    breakers: Arc<BreakerManager>,
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl RemoteDomain {
    pub fn new(
        service: impl Into<String>,
        path: impl Into<String>,
        registry: Arc<ServiceRegistry>,
        breakers: Arc<BreakerManager>,
        client: Client<HttpConnector, Body>,
        timeout: Duration,
    ) -> Self {
        Self {
            service: service.into(),
            path: path.into(),
            registry,
            breakers,
            client,
            timeout,
        }
    }

    async fn call(&self, instance: &ServiceInstance, request: &QueryRequest) -> Result<Value, DomainError> {
        let url = instance
            .base_url()
            .and_then(|base| base.join(&self.path))
            .map_err(|e| DomainError::Transport(e.to_string()))?;
        let body = serde_json::to_vec(request).map_err(|e| DomainError::Decode(e.to_string()))?;

        let req = Request::builder()
            .method("POST")
            .uri(url.as_str())
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, "fanout-guard")
            .body(Body::from(body))
            .map_err(|e| DomainError::Transport(e.to_string()))?;

        let exchange = async {
            let response = self
                .client
                .request(req)
                .await
                .map_err(|e| DomainError::Transport(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(DomainError::Status {
                    service: self.service.clone(),
                    status: status.as_u16(),
                });
            }
            let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_RESPONSE_BYTES)
                .await
                .map_err(|e| DomainError::Transport(e.to_string()))?;
            serde_json::from_slice::<Value>(&bytes).map_err(|e| DomainError::Decode(e.to_string()))
        };

        match time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::Timeout {
                url: url.to_string(),
                after: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl DomainHandler for RemoteDomain {
    async fn handle(&self, request: &QueryRequest) -> Result<Value, DomainError> {
        let instance = self
            .registry
            .get_service_instance(&self.service)
            .ok_or_else(|| DomainError::NoInstance(self.service.clone()))?;

        let breaker = self
            .breakers
            .get_or_create(&instance_breaker_name(&self.service, &instance.id))
            .await;

        match breaker.execute(|| self.call(&instance, request)).await {
            Ok(value) => {
                self.registry.record_success(&instance.id);
                Ok(value)
            }
            Err(BreakerError::Open { name }) => Err(DomainError::CircuitOpen(name)),
            Err(BreakerError::Timeout { after, .. }) => {
                self.registry.record_failure(&instance.id);
                Err(DomainError::Timeout {
                    url: format!("{}:{}{}", instance.host, instance.port, self.path),
                    after,
                })
            }
            Err(BreakerError::Operation(e)) => {
                tracing::warn!(
                    service = %self.service,
                    instance = %instance.id,
                    error = %e,
                    "Remote domain call failed"
                );
                self.registry.record_failure(&instance.id);
                Err(e)
            }
        }
    }
}
