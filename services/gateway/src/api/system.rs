//! System/health API handlers.
//!
//! # Key invariants and assumptions
//! - Health checks must be fast and side-effect free.
//! - System info is built from in-memory state only.
use crate::api::error::{ApiError, api_internal};
use crate::api::types::{HealthStatus, SystemInfo};
use crate::app::{AppState, SERVICE_NAME};
use axum::Json;
use axum::extract::State;

#[utoipa::path(
    get,
    path = "/v1/system/info",
    tag = "system",
    responses(
        (status = 200, description = "Gateway identity and live push connection count", body = SystemInfo)
    )
)]
/// Return gateway identity and load.
pub(crate) async fn system_info(State(state): State<AppState>) -> Json<SystemInfo> {
    Json(SystemInfo {
        service: SERVICE_NAME.to_string(),
        api_version: state.api_version.clone(),
        storage_backend: state.directory.backend_name().to_string(),
        push_connections: state.registry.total_connections(),
    })
}

#[utoipa::path(
    get,
    path = "/v1/system/health",
    tag = "system",
    responses(
        (status = 200, description = "Gateway health", body = HealthStatus),
        (status = 500, description = "Camera directory unavailable")
    )
)]
/// Query the camera directory and report `ok` if it answers.
pub(crate) async fn system_health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, ApiError> {
    if let Err(err) = state.directory.health_check().await {
        return Err(api_internal("camera directory unavailable", &err));
    }
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
    }))
}
