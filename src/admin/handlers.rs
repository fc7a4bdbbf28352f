use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::cache::CacheMetrics;
use crate::registry::{InstanceRecord, ServiceHealth};
use crate::resilience::BreakerSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub services: usize,
    pub instances: usize,
    pub breakers: usize,
    pub open_breakers: usize,
    pub health_checking: bool,
    pub domains: Vec<String>,
}

#[derive(Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub health: ServiceHealth,
    pub instances: Vec<InstanceRecord>,
}

#[derive(Serialize)]
pub struct BreakerStatus {
    #[serde(flatten)]
    pub snapshot: BreakerSnapshot,
    pub success_rate: f64,
    pub healthy: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let breakers = state.breakers.all();
    let open_breakers = breakers
        .iter()
        .filter(|b| b.state() != crate::resilience::CircuitState::Closed)
        .count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if open_breakers == 0 { "operational" } else { "degraded" },
        services: state.registry.list_services().len(),
        instances: state.registry.all_instances().len(),
        breakers: breakers.len(),
        open_breakers,
        health_checking: state.registry.is_health_checking(),
        domains: state.orchestrator.domains(),
    })
}

pub async fn get_services(State(state): State<AdminState>) -> Json<Vec<ServiceStatus>> {
    let instances = state.registry.all_instances();
    let statuses = state
        .registry
        .list_services()
        .into_iter()
        .map(|name| ServiceStatus {
            health: state.registry.get_service_health(&name),
            instances: instances
                .iter()
                .filter(|i| i.name == name)
                .map(|i| i.record())
                .collect(),
            name,
        })
        .collect();
    Json(statuses)
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerStatus>> {
    Json(
        state
            .breakers
            .all()
            .iter()
            .map(|b| BreakerStatus {
                snapshot: b.snapshot(),
                success_rate: b.success_rate(),
                healthy: b.is_healthy(),
            })
            .collect(),
    )
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<CacheMetrics> {
    Json(state.orchestrator.cache().metrics())
}
