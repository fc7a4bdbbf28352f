//! Fan-out query orchestration.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::cache::{DomainOutcome, DomainQuery, FanoutCache, QueryRequest};
use crate::orchestrator::handler::{DomainError, DomainHandler};
use crate::orchestrator::remote::RemoteDomain;
use crate::registry::ServiceRegistry;
use crate::resilience::BreakerManager;
use axum::body::Body;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

/// Default deadline for remote domain calls.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Merged answer of one fan-out query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutResponse {
    pub request_id: Uuid,
    pub query: String,
    /// One outcome per requested domain, in request order.
    pub results: Vec<DomainOutcome>,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub elapsed_ms: u64,
}

impl FanoutResponse {
    pub fn result(&self, domain: &str) -> Option<&DomainOutcome> {
        self.results.iter().find(|o| o.domain == domain)
    }
}

/// Routes domains to handlers and fans queries out through the cache.
pub struct Orchestrator {
    cache: FanoutCache,
    registry: Arc<ServiceRegistry>,
    breakers: Arc<BreakerManager>,
    handlers: DashMap<String, Arc<dyn DomainHandler>>,
    client: Client<HttpConnector, Body>,
    remote_timeout: Duration,
}

impl Orchestrator {
    pub fn new(cache: FanoutCache, registry: Arc<ServiceRegistry>, breakers: Arc<BreakerManager>) -> Self {
        Self {
            cache,
            registry,
            breakers,
            handlers: DashMap::new(),
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &FanoutCache {
        &self.cache
    }

    /// Answer `domain` in process. Replaces any previous handler.
    pub fn register_local(&self, domain: impl Into<String>, handler: Arc<dyn DomainHandler>) {
        let domain = domain.into();
        tracing::info!(domain = %domain, "Local domain registered");
        self.handlers.insert(domain, handler);
    }

    /// Answer `domain` by POSTing to an instance of `service`.
    pub fn register_remote(&self, domain: impl Into<String>, service: impl Into<String>, path: impl Into<String>) {
        let domain = domain.into();
        let service = service.into();
        tracing::info!(domain = %domain, service = %service, "Remote domain registered");
        let handler = RemoteDomain::new(
            service,
            path,
            self.registry.clone(),
            self.breakers.clone(),
            self.client.clone(),
            self.remote_timeout,
        );
        self.handlers.insert(domain, Arc::new(handler));
    }

    /// Registered domains, sorted.
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.handlers.iter().map(|r| r.key().clone()).collect();
        domains.sort();
        domains
    }

    /// Query every domain concurrently and merge the outcomes.
    pub async fn query(&self, request: QueryRequest, domains: &[String]) -> FanoutResponse {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let mut slots: Vec<Option<DomainOutcome>> = Vec::with_capacity(domains.len());
        let mut batch = Vec::new();
        for domain in domains {
            match self.handlers.get(domain).map(|h| h.value().clone()) {
                Some(handler) => {
                    let req = request.clone();
                    batch.push(DomainQuery::new(domain.clone(), request.clone(), move || async move {
                        handler.handle(&req).await
                    }));
                    slots.push(None);
                }
                None => slots.push(Some(DomainOutcome {
                    domain: domain.clone(),
                    result: None,
                    error: Some(DomainError::UnknownDomain(domain.clone()).to_string()),
                })),
            }
        }

        let mut executed = self.cache.execute_parallel(batch).await.into_iter();
        let results: Vec<DomainOutcome> = slots
            .into_iter()
            .filter_map(|slot| slot.or_else(|| executed.next()))
            .collect();

        let names = |success: bool| -> Vec<String> {
            results
                .iter()
                .filter(|o| o.is_success() == success)
                .map(|o| o.domain.clone())
                .collect()
        };
        let succeeded = names(true);
        let failed = names(false);
        let response = FanoutResponse {
            request_id,
            query: request.query,
            results,
            succeeded,
            failed,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            request_id = %response.request_id,
            domains = domains.len(),
            succeeded = response.succeeded.len(),
            failed = response.failed.len(),
            elapsed_ms = response.elapsed_ms,
            "Fan-out query completed"
        );
        response
    }
}
