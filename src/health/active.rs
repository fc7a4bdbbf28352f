//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every registered instance
//! - Feed probe results back into the registry

use axum::body::Body;
use axum::http::Request;
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::registry::{ServiceInstance, ServiceRegistry};

pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<ServiceRegistry>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            registry,
            config,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let interval = Duration::from_secs(self.config.interval_secs);
        let mut ticker = time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every instance once, concurrently.
    pub async fn check_all(&self) {
        let instances = self.registry.all_instances();
        join_all(instances.iter().map(|instance| async move {
            let healthy = self.probe(instance).await;
            self.registry.apply_probe_result(instance, healthy);
        }))
        .await;
    }

    async fn probe(&self, instance: &ServiceInstance) -> bool {
        let uri = match instance.base_url().and_then(|base| base.join(&self.config.path)) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(instance = %instance.id, error = %e, "Invalid health check URL");
                return false;
            }
        };

        let request = match Request::builder()
            .method("GET")
            .uri(uri.as_str())
            .header("user-agent", "fanout-guard-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!("Failed to build health check request: {}", e);
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(instance = %instance.id, url = %uri, status = %response.status(), "Health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(instance = %instance.id, url = %uri, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(instance = %instance.id, url = %uri, "Health check failed: timeout");
                false
            }
        }
    }
}
