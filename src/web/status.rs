//! Health and status handlers.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{trace, warn};

use crate::data::health;
use crate::flywheel::PoolStats;
use crate::state::{AppState, ServiceStatus};
use crate::utils::fmt_duration;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    name: String,
    status: ServiceStatus,
    seconds_since_update: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSummary {
    enabled: bool,
    min_seconds_since_last_refresh: u64,
    default_refreshes_per_day: u32,
    tenant_overrides: usize,
    blacklisted_providers: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStatus {
    status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency: Option<String>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    status: ServiceStatus,
    version: String,
    commit: String,
    services: BTreeMap<String, ServiceInfo>,
    database: DatabaseStatus,
    settings: SettingsSummary,
    pools: Vec<PoolStats>,
}

/// Health check endpoint
pub(super) async fn health() -> Json<Value> {
    trace!("health check requested");
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Service health, database reachability, the settings in effect and pool
/// occupancy.
pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let mut services = BTreeMap::new();
    for (name, status, seconds_since_update) in state.service_statuses.all() {
        services.insert(
            name.clone(),
            ServiceInfo {
                name,
                status,
                seconds_since_update,
            },
        );
    }

    let database = match health::ping(&state.db_pool).await {
        Ok(latency) => DatabaseStatus {
            status: ServiceStatus::Active,
            latency: Some(fmt_duration(latency)),
        },
        Err(e) => {
            warn!(error = ?e, "database ping failed");
            DatabaseStatus {
                status: ServiceStatus::Error,
                latency: None,
            }
        }
    };

    let overall_status = if database.status == ServiceStatus::Error
        || services
            .values()
            .any(|s| matches!(s.status, ServiceStatus::Error))
    {
        ServiceStatus::Error
    } else if services.is_empty() {
        ServiceStatus::Disabled
    } else {
        ServiceStatus::Active
    };

    let settings = state.settings.snapshot().await;
    let mut blacklisted_providers: Vec<_> = settings.blacklisted_providers.iter().cloned().collect();
    blacklisted_providers.sort();

    Json(StatusResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("GIT_COMMIT_HASH").to_string(),
        services,
        database,
        settings: SettingsSummary {
            enabled: settings.enabled,
            min_seconds_since_last_refresh: settings.min_seconds_since_last_refresh,
            default_refreshes_per_day: settings.default_refreshes_per_day,
            tenant_overrides: settings.per_tenant_refreshes_per_day.len(),
            blacklisted_providers,
        },
        pools: state.trigger.pool_stats().to_vec(),
    })
}
