//! OpenAPI schema aggregation for the gateway's HTTP routes.
//!
//! The push socket (`GET /events`) is a WebSocket upgrade and is documented in
//! the crate docs rather than here.
use crate::api::{
    internal, streams, system,
    types::{DispatchResponse, ErrorResponse, HealthStatus, SystemInfo},
};
use crate::proxy::StreamFormat;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "camgate-gateway",
        version = "v1",
        description = "Tenant-scoped live camera stream gateway"
    ),
    paths(
        system::system_info,
        system::system_health,
        streams::get_stream,
        streams::post_stream,
        internal::dispatch_event
    ),
    components(schemas(
        SystemInfo,
        HealthStatus,
        ErrorResponse,
        DispatchResponse,
        StreamFormat
    )),
    tags(
        (name = "system", description = "System and health endpoints"),
        (name = "streams", description = "Live stream relay"),
        (name = "internal", description = "In-cluster event production")
    )
)]
pub struct ApiDoc;
