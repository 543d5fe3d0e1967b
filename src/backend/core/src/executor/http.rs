//! REST surface for the Executor.
//!
//! Rollback and approval land here for operators; status is read-only. The
//! Prometheus scrape endpoint rides along when a recorder handle is wired in.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::Executor;
use crate::contracts::ActionRecord;
use crate::error::MedicError;
use crate::health::{ComponentHealth, HealthChecker, HealthStatus};

/// Per-probe deadline for dependency checks on `/health`.
const PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Standard REST response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Shared state for the REST handlers.
#[derive(Clone)]
pub struct HttpState {
    pub executor: Arc<Executor>,
    pub prometheus: Option<PrometheusHandle>,
    pub checkers: Vec<Arc<dyn HealthChecker>>,
}

/// Build the Executor's REST router.
pub fn build_router(state: HttpState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/actions", get(list_actions))
        .route("/actions/:id", get(get_action))
        .route("/actions/:id/rollback", post(rollback_action))
        .route("/actions/:id/approve", post(approve_action))
        .route("/actions/:id/reject", post(reject_action))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    execution_mode: String,
    active_actions: usize,
    queued_actions: usize,
    components: Vec<ComponentHealth>,
}

async fn health(State(state): State<HttpState>) -> impl IntoResponse {
    let mut components = Vec::with_capacity(state.checkers.len());
    for checker in &state.checkers {
        components.push(checker.check_with_timeout(PROBE_TIMEOUT).await);
    }

    let degraded = components
        .iter()
        .any(|c| c.status != HealthStatus::Healthy);
    let code = if degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(ApiResponse::success(HealthBody {
            status: if degraded { "degraded" } else { "ok" },
            execution_mode: state.executor.execution_mode().to_string(),
            active_actions: state.executor.active_actions(),
            queued_actions: state.executor.queued_actions(),
            components,
        })),
    )
}

async fn prometheus_metrics(State(state): State<HttpState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics recorder not installed".to_string(),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct ActionsQuery {
    #[serde(default)]
    database_id: String,
}

async fn list_actions(
    State(state): State<HttpState>,
    Query(query): Query<ActionsQuery>,
) -> Json<ApiResponse<Vec<ActionRecord>>> {
    Json(ApiResponse::success(
        state.executor.pending_actions(&query.database_id),
    ))
}

async fn get_action(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ActionRecord>>, MedicError> {
    let record = state
        .executor
        .get_action(&id)
        .ok_or_else(|| MedicError::action_not_found(&id))?;
    Ok(Json(ApiResponse::success(record)))
}

async fn rollback_action(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ActionRecord>>, MedicError> {
    let record = state
        .executor
        .rollback_action(&id, "Operator rollback request")
        .await?;
    Ok(Json(ApiResponse::success(record)))
}

async fn approve_action(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<&'static str>>, MedicError> {
    if state.executor.resolve_approval(&id, true) {
        Ok(Json(ApiResponse::success("approved")))
    } else {
        Err(MedicError::action_not_found(&id))
    }
}

async fn reject_action(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<&'static str>>, MedicError> {
    if state.executor.resolve_approval(&id, false) {
        Ok(Json(ApiResponse::success("rejected")))
    } else {
        Err(MedicError::action_not_found(&id))
    }
}
