//! Stream relay handlers.
//!
//! # Purpose and responsibility
//! `GET /streams/{camera_key}` relays a live stream; `POST` on the same path
//! relays a WebRTC signaling offer.
//!
//! # Key invariants and assumptions
//! Checks run in a fixed order: caller token, request shape (camera key, query
//! string, format), camera ownership, relay. Malformed requests from callers
//! without a valid token answer 401, never 400.
//! Authentication and ownership failures never reach the upstream, and a
//! rejected format never opens an upstream connection.
//!
//! # Security considerations
//! - The token may arrive in the query string for players that cannot set
//!   headers; it is read here and never logged.
//! - Not-owned and not-found both answer 403 with the same body.
use crate::api::error::{ApiError, api_unauthorized, api_validation_error};
use crate::app::AppState;
use crate::auth::{authenticate, request_token};
use crate::ownership::resolve;
use crate::proxy::{RelayMethod, StreamFormat, StreamRequest};
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Uri, header};
use axum::response::Response;
use bytes::Bytes;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct StreamQuery {
    /// `hls` (default), `mjpeg`, `webrtc` or `snapshot`.
    pub format: Option<String>,
    /// Caller token for clients that cannot send `Authorization`.
    pub token: Option<String>,
}

#[utoipa::path(
    get,
    path = "/streams/{camera_key}",
    tag = "streams",
    params(
        ("camera_key" = String, Path, description = "Tenant-scoped camera key"),
        StreamQuery
    ),
    responses(
        (status = 200, description = "Live stream body relayed from the camera backend"),
        (status = 400, description = "Unsupported format or invalid camera key", body = crate::api::types::ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::api::types::ErrorResponse),
        (status = 403, description = "Camera not available to the caller", body = crate::api::types::ErrorResponse),
        (status = 503, description = "Camera backend unavailable", body = crate::api::types::ErrorResponse),
        (status = 504, description = "Camera backend timed out", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_stream(
    State(state): State<AppState>,
    camera_key: Result<Path<String>, PathRejection>,
    query: Result<Query<StreamQuery>, QueryRejection>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request = RelayInput::new(camera_key, query, &uri, &headers);
    let request_id = request_id(&headers);
    relay(&state, request, RelayMethod::Get)
        .await
        .map_err(|err| err.with_request_id(request_id))
}

#[utoipa::path(
    post,
    path = "/streams/{camera_key}",
    tag = "streams",
    params(
        ("camera_key" = String, Path, description = "Tenant-scoped camera key"),
        StreamQuery
    ),
    request_body(content = String, description = "WebRTC signaling offer", content_type = "application/json"),
    responses(
        (status = 200, description = "Signaling answer relayed from the camera backend"),
        (status = 400, description = "Format does not accept a body", body = crate::api::types::ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = crate::api::types::ErrorResponse),
        (status = 403, description = "Camera not available to the caller", body = crate::api::types::ErrorResponse),
        (status = 413, description = "Offer too large"),
        (status = 503, description = "Camera backend unavailable", body = crate::api::types::ErrorResponse),
        (status = 504, description = "Camera backend timed out", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn post_stream(
    State(state): State<AppState>,
    camera_key: Result<Path<String>, PathRejection>,
    query: Result<Query<StreamQuery>, QueryRejection>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = RelayInput::new(camera_key, query, &uri, &headers);
    let request_id = request_id(&headers);
    let method = RelayMethod::Post {
        body,
        content_type: headers.get(header::CONTENT_TYPE).cloned(),
    };
    relay(&state, request, method)
        .await
        .map_err(|err| err.with_request_id(request_id))
}

/// `GET /streams/` and `/streams`: authenticated callers get a 400.
pub(crate) async fn get_stream_without_key(
    State(state): State<AppState>,
    query: Result<Query<StreamQuery>, QueryRejection>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request = RelayInput::without_key(query, &uri, &headers);
    let request_id = request_id(&headers);
    relay(&state, request, RelayMethod::Get)
        .await
        .map_err(|err| err.with_request_id(request_id))
}

pub(crate) async fn post_stream_without_key(
    State(state): State<AppState>,
    query: Result<Query<StreamQuery>, QueryRejection>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request = RelayInput::without_key(query, &uri, &headers);
    let request_id = request_id(&headers);
    let method = RelayMethod::Post {
        body: Bytes::new(),
        content_type: None,
    };
    relay(&state, request, method)
        .await
        .map_err(|err| err.with_request_id(request_id))
}

/// Extracted request parts. Extraction failures are held back until the
/// caller has authenticated.
struct RelayInput<'a> {
    camera_key: Result<String, ApiError>,
    query: Result<StreamQuery, ApiError>,
    token: Option<String>,
    headers: &'a HeaderMap,
}

#[derive(Deserialize)]
struct TokenOnly {
    token: Option<String>,
}

impl<'a> RelayInput<'a> {
    fn new(
        camera_key: Result<Path<String>, PathRejection>,
        query: Result<Query<StreamQuery>, QueryRejection>,
        uri: &Uri,
        headers: &'a HeaderMap,
    ) -> Self {
        let camera_key = camera_key.map(|Path(key)| key).map_err(|err| {
            tracing::debug!(error = %err, "camera key rejected");
            api_validation_error("invalid camera key")
        });
        Self::with_key(camera_key, query, uri, headers)
    }

    fn without_key(
        query: Result<Query<StreamQuery>, QueryRejection>,
        uri: &Uri,
        headers: &'a HeaderMap,
    ) -> Self {
        let camera_key = Err(api_validation_error("camera key must not be empty"));
        Self::with_key(camera_key, query, uri, headers)
    }

    fn with_key(
        camera_key: Result<String, ApiError>,
        query: Result<Query<StreamQuery>, QueryRejection>,
        uri: &Uri,
        headers: &'a HeaderMap,
    ) -> Self {
        let (query, token) = match query {
            Ok(Query(query)) => {
                let token = query.token.clone();
                (Ok(query), token)
            }
            Err(err) => {
                tracing::debug!(error = %err, "stream query rejected");
                // A malformed `format` must not hide a valid query token.
                let token = Query::<TokenOnly>::try_from_uri(uri)
                    .ok()
                    .and_then(|Query(only)| only.token);
                (Err(api_validation_error("invalid query string")), token)
            }
        };
        Self {
            camera_key,
            query,
            token,
            headers,
        }
    }
}

async fn relay(
    state: &AppState,
    request: RelayInput<'_>,
    method: RelayMethod,
) -> Result<Response, ApiError> {
    let token = request_token(request.headers, request.token.as_deref());
    let caller = authenticate(state.verifier.as_ref(), token, "streams")
        .map_err(|_| api_unauthorized("invalid or missing token"))?;
    let camera_key = request.camera_key?;
    let query = request.query?;

    let format = StreamFormat::parse_optional(query.format.as_deref())
        .map_err(|_| api_validation_error("unsupported stream format"))?;
    if matches!(method, RelayMethod::Post { .. }) && !format.allows_post() {
        return Err(api_validation_error("format does not accept a request body"));
    }

    let locator = resolve(state.directory.as_ref(), &caller.tenant_id, &camera_key).await?;
    let response = state
        .proxy
        .relay(StreamRequest {
            tenant_id: caller.tenant_id,
            locator,
            format,
            method,
        })
        .await?;
    Ok(response)
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
