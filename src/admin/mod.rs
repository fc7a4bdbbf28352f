//! Read-only diagnostics endpoint.
//!
//! ```text
//! GET /admin/status    overall counts, open breakers, registered domains
//! GET /admin/services  per-service health and instance records
//! GET /admin/breakers  breaker snapshots with success rates
//! GET /admin/cache     fan-out cache metrics
//! ```
//!
//! Every route requires `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::Core;
use crate::orchestrator::Orchestrator;
use crate::registry::ServiceRegistry;
use crate::resilience::BreakerManager;

/// Shared handles the diagnostics handlers read from.
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<ServiceRegistry>,
    pub breakers: Arc<BreakerManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn from_core(core: &Core) -> Self {
        Self {
            registry: core.registry(),
            breakers: core.breakers(),
            orchestrator: core.orchestrator(),
            api_key: Arc::from(core.config().admin.api_key.as_str()),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/services", get(get_services))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/cache", get(get_cache))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the diagnostics router until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AdminState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Admin endpoint listening");
    }
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FanoutCache;
    use crate::config::{CacheConfig, RegistryConfig};
    use crate::registry::{HealthState, ServiceInstance};
    use crate::resilience::CircuitBreakerConfig;
    use tokio::sync::oneshot;

    async fn start() -> (String, oneshot::Sender<()>) {
        let registry = Arc::new(ServiceRegistry::new(RegistryConfig::default()));
        registry.register_service(
            ServiceInstance::new("kbli-1", "kbli", "127.0.0.1", 7001).with_health(HealthState::Healthy),
        );
        let breakers = Arc::new(BreakerManager::new(CircuitBreakerConfig::default()));
        breakers.get_or_create("kbli/kbli-1").await.force_open();
        let orchestrator = Arc::new(Orchestrator::new(
            FanoutCache::new(CacheConfig::default()),
            registry.clone(),
            breakers.clone(),
        ));

        let state = AdminState {
            registry,
            breakers,
            orchestrator,
            api_key: Arc::from("secret"),
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();
        tokio::spawn(serve(listener, state, async {
            let _ = rx.await;
        }));
        (base, tx)
    }

    #[tokio::test]
    async fn test_requires_bearer_key() {
        let (base, _stop) = start().await;
        let client = reqwest::Client::new();

        let resp = client.get(format!("{base}/admin/status")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

        let resp = client
            .get(format!("{base}/admin/status"))
            .bearer_auth("wrong")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_diagnostics_payloads() {
        let (base, _stop) = start().await;
        let client = reqwest::Client::new();
        let get = |path: &str| {
            client
                .get(format!("{base}{path}"))
                .bearer_auth("secret")
                .send()
        };

        let status: serde_json::Value = get("/admin/status").await.unwrap().json().await.unwrap();
        assert_eq!(status["status"], "degraded");
        assert_eq!(status["open_breakers"], 1);

        let services: serde_json::Value = get("/admin/services").await.unwrap().json().await.unwrap();
        assert_eq!(services[0]["name"], "kbli");
        assert_eq!(services[0]["health"]["healthy"], 1);
        assert_eq!(services[0]["instances"][0]["id"], "kbli-1");

        let breakers: serde_json::Value = get("/admin/breakers").await.unwrap().json().await.unwrap();
        assert_eq!(breakers[0]["name"], "kbli/kbli-1");
        assert_eq!(breakers[0]["state"], "OPEN");

        let cache: serde_json::Value = get("/admin/cache").await.unwrap().json().await.unwrap();
        assert_eq!(cache["hits"], 0);
    }
}
