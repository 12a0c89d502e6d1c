//! Gateway HTTP application wiring.
//!
//! # Purpose
//! Builds the public and internal Axum routers and defines the shared state
//! injected into handlers.
//!
//! # Notes
//! Request spans record the path only; the query string can carry a caller
//! token and is never logged.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::auth::TokenVerifier;
use crate::config::GatewayConfig;
use crate::observability;
use crate::proxy::StreamProxy;
use crate::push::{EventBroadcaster, HubBroadcaster, PushSettings, SessionContext, SessionShutdown};
use crate::store::CameraDirectory;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::MethodRouter;
use camgate_hub::{ConnectionRegistry, Dispatcher};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;

pub const SERVICE_NAME: &str = "camgate-gateway";
pub const API_VERSION: &str = "v1";
/// Largest WebRTC signaling offer accepted on `POST /streams/{key}`.
pub const MAX_SIGNALING_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub api_version: String,
    pub directory: Arc<dyn CameraDirectory>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub proxy: Arc<StreamProxy>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<dyn EventBroadcaster>,
    pub push: PushSettings,
    pub shutdown: SessionShutdown,
    pub internal_token: Option<String>,
}

impl AppState {
    pub fn new(
        config: &GatewayConfig,
        directory: Arc<dyn CameraDirectory>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> anyhow::Result<Self> {
        let proxy = Arc::new(StreamProxy::new(&config.upstream)?);
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster: Arc<dyn EventBroadcaster> =
            Arc::new(HubBroadcaster::new(Dispatcher::new(registry.clone())));
        Ok(Self {
            api_version: API_VERSION.to_string(),
            directory,
            verifier,
            proxy,
            registry,
            broadcaster,
            push: PushSettings::from(&config.push),
            shutdown: SessionShutdown::new(),
            internal_token: config.internal_token.clone(),
        })
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            registry: self.registry.clone(),
            settings: self.push,
            shutdown: self.shutdown.clone(),
        }
    }
}

fn request_span(request: &axum::http::Request<axum::body::Body>) -> tracing::Span {
    let parent = observability::trace_context_from_headers(request.headers());
    let span = tracing::info_span!(
        "http.request",
        method = %request.method(),
        path = %request.uri().path(),
        version = ?request.version()
    );
    span.set_parent(parent);
    span
}

fn missing_key_routes() -> MethodRouter<AppState> {
    axum::routing::get(api::streams::get_stream_without_key)
        .post(api::streams::post_stream_without_key)
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/system/info",
            axum::routing::get(api::system::system_info),
        )
        .route(
            "/v1/system/health",
            axum::routing::get(api::system::system_health),
        )
        .route(
            "/streams/:camera_key",
            axum::routing::get(api::streams::get_stream)
                .post(api::streams::post_stream)
                .layer(DefaultBodyLimit::max(MAX_SIGNALING_BODY_BYTES)),
        )
        .route("/streams", missing_key_routes())
        .route("/streams/", missing_key_routes())
        .route("/events", axum::routing::get(api::events::events))
        .merge(
            utoipa_swagger_ui::SwaggerUi::new("/docs").url("/v1/openapi.json", ApiDoc::openapi()),
        )
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Routes for in-cluster producers. Served on its own listener.
pub fn build_internal_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/internal/tenants/:tenant_id/events",
            axum::routing::post(api::internal::dispatch_event),
        )
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}
