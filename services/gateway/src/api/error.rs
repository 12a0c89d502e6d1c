//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Keeps every failure body in the `{ code, message, request_id }` shape and
//! maps resolver and proxy failures onto gateway status codes.
//!
//! # Security considerations
//! - Internal errors are logged server-side; callers get a generic message.
//! - A camera owned by another tenant and a missing camera produce the exact
//!   same error.
//! - Upstream failures never carry upstream addresses or upstream bodies.
use crate::api::types::ErrorResponse;
use crate::ownership::ResolveError;
use crate::proxy::ProxyError;
use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Structured API error returned by handlers.
///
/// # Invariants
/// - `status` must match the semantics of `body.code`.
///
/// # Example
/// ```rust
/// use axum::http::StatusCode;
/// use gateway::api::error::ApiError;
/// use gateway::api::types::ErrorResponse;
///
/// let err = ApiError {
///     status: StatusCode::FORBIDDEN,
///     body: ErrorResponse {
///         code: "forbidden".to_string(),
///         message: "camera not available".to_string(),
///         request_id: None,
///     },
/// };
/// assert_eq!(err.with_request_id("req-1").body.request_id.as_deref(), Some("req-1"));
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            status,
            body: ErrorResponse {
                code: code.to_string(),
                message: message.to_string(),
                request_id: None,
            },
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.body.request_id = Some(request_id.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Build a 404 error for disabled features.
pub fn api_not_enabled(message: &str) -> ApiError {
    // NOT_FOUND avoids advertising that the feature exists.
    ApiError::new(StatusCode::NOT_FOUND, "not_enabled", message)
}

/// Build a 500 Internal Server Error from a store error.
pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "gateway storage error");
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Build a 500 Internal Server Error without a store error.
pub fn api_internal_message(message: &str) -> ApiError {
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Build a 401 Unauthorized error.
pub fn api_unauthorized(message: &str) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

/// Build a 403 Forbidden error.
pub fn api_forbidden(message: &str) -> ApiError {
    ApiError::new(StatusCode::FORBIDDEN, "forbidden", message)
}

/// Build a 400 Bad Request validation error.
pub fn api_validation_error(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// Build a 503 for an unreachable or failing camera backend.
pub fn api_upstream_unavailable(message: &str) -> ApiError {
    ApiError::new(
        StatusCode::SERVICE_UNAVAILABLE,
        "upstream_unavailable",
        message,
    )
}

/// Build a 504 for a camera backend that did not answer in time.
pub fn api_upstream_timeout(message: &str) -> ApiError {
    ApiError::new(StatusCode::GATEWAY_TIMEOUT, "upstream_timeout", message)
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::InvalidKey(reason) => api_validation_error(reason),
            ResolveError::NotFound => api_forbidden("camera not available"),
            ResolveError::LookupFailed(err) => api_internal("camera lookup failed", &err),
        }
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::MethodNotAllowed(_) => {
                api_validation_error("format does not accept a request body")
            }
            ProxyError::Timeout => api_upstream_timeout("camera stream timed out"),
            ProxyError::Unavailable => api_upstream_unavailable("camera stream unavailable"),
        }
    }
}
