//! Internal event dispatch endpoint.
//!
//! # Purpose
//! Lets in-cluster producers broadcast a JSON event to every live push
//! connection of a tenant. Served only on the internal listener.
//!
//! # Security considerations
//! - Requires `X-Camgate-Internal-Token`, compared in constant time.
//! - Answers 404 `not_enabled` when no internal token is configured.
use crate::api::error::{
    ApiError, api_internal_message, api_not_enabled, api_unauthorized, api_validation_error,
};
use crate::api::types::DispatchResponse;
use crate::app::AppState;
use crate::push::BroadcastError;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde_json::Value;

pub const INTERNAL_TOKEN_HEADER: &str = "x-camgate-internal-token";

#[utoipa::path(
    post,
    path = "/internal/tenants/{tenant_id}/events",
    tag = "internal",
    params(("tenant_id" = String, Path, description = "Tenant identifier")),
    request_body(content = String, description = "JSON event payload delivered as `data`", content_type = "application/json"),
    responses(
        (status = 202, description = "Event dispatched", body = DispatchResponse),
        (status = 400, description = "Invalid payload", body = crate::api::types::ErrorResponse),
        (status = 401, description = "Invalid internal token", body = crate::api::types::ErrorResponse),
        (status = 404, description = "Not enabled", body = crate::api::types::ErrorResponse)
    )
)]
pub async fn dispatch_event(
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<DispatchResponse>), ApiError> {
    let Some(expected) = state.internal_token.as_deref() else {
        return Err(api_not_enabled("internal dispatch not enabled"));
    };
    ensure_internal_authorized(expected, &headers)?;

    let Json(payload) =
        payload.map_err(|err| api_validation_error(&format!("invalid event payload: {err}")))?;
    let report = state
        .broadcaster
        .dispatch(&tenant_id, &payload)
        .map_err(|err| match err {
            BroadcastError::EmptyTenant => api_validation_error("tenant_id is required"),
            BroadcastError::Encode(err) => {
                tracing::error!(error = %err, "failed to encode event");
                api_internal_message("failed to encode event")
            }
        })?;
    Ok((StatusCode::ACCEPTED, Json(report.into())))
}

fn ensure_internal_authorized(expected: &str, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = match headers.get(INTERNAL_TOKEN_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| api_unauthorized("invalid internal token"))?,
        None => return Err(api_unauthorized("missing internal token")),
    };
    if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        return Err(api_unauthorized("invalid internal token"));
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |diff, (left, right)| diff | (left ^ right))
        == 0
}
