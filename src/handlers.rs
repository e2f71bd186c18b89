use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::gateway::GatewayContext;
use crate::health::HealthChecker;
use crate::keys::{Action, Provider};
use crate::metrics::GatewayMetrics;
use crate::quota::{is_valid_endpoint, QuotaGate};

pub type SharedState = Arc<AppState>;

/// State behind the operational API.
pub struct AppState {
    pub quota: QuotaGate,
    pub metrics: GatewayMetrics,
    pub health: HealthChecker,
}

impl AppState {
    /// Operational state over the same store, quota gate and metrics the
    /// feature gateways built from `ctx` use.
    pub fn from_context(ctx: &GatewayContext, backend: &'static str) -> Self {
        Self {
            quota: ctx.quota.clone(),
            metrics: ctx.metrics.clone(),
            health: HealthChecker::new(Arc::clone(&ctx.store), backend),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UsageParams {
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Current month's usage and budget for one provider/action pair
pub async fn usage_status(
    State(state): State<SharedState>,
    Path((provider, action)): Path<(Provider, Action)>,
    Query(params): Query<UsageParams>,
) -> Result<impl IntoResponse, GatewayError> {
    let endpoint = params.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty());
    if let Some(endpoint) = endpoint {
        if !is_valid_endpoint(endpoint) {
            return Err(GatewayError::InvalidRequest(format!(
                "invalid endpoint qualifier '{}'",
                endpoint
            )));
        }
    }

    let status = state.quota.status(provider, action, endpoint).await?;
    Ok(Json(status))
}

pub async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.metrics.snapshot().await)
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let health = state.health.check_health().await;
    let code = if health.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health))
}

/// Readiness check endpoint
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    let health = state.health.check_health().await;
    if health.status == "healthy" {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": health.dependencies.store.backend
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "store": health.dependencies.store.backend,
                "error": health.dependencies.store.error
            })),
        )
    }
}
