//! Tracing, trace-context propagation and Prometheus metrics for the gateway.
//!
//! # Notes
//! Everything here is process-global and installed at most once, so tests and
//! `main` may both call [`init_observability`]. Tokens, upstream credentials
//! and the upstream base URL must never be recorded as span or log fields.
use anyhow::Context;
use axum::Router;
use axum::http::HeaderMap;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Mutex, Once};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static TRACING: Once = Once::new();
static PROPAGATOR: Once = Once::new();
static RECORDER: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Deployment metadata copied onto exported spans when present.
const RESOURCE_ENV: [(&str, &str); 3] = [
    ("K8S_NAMESPACE_NAME", "k8s.namespace.name"),
    ("K8S_POD_NAME", "k8s.pod.name"),
    ("DEPLOYMENT_ENVIRONMENT", "deployment.environment"),
];

/// Install the tracing subscriber and the Prometheus recorder.
///
/// Spans are exported over OTLP only when an exporter can be built; otherwise
/// logs go to stdout alone. `RUST_LOG` overrides the default `info` filter.
pub fn init_observability(service_name: &str) -> anyhow::Result<PrometheusHandle> {
    TRACING.call_once(|| {
        install_propagator();
        let otel = span_exporter(service_name).map(|provider| {
            let tracer = provider.tracer(service_name.to_string());
            global::set_tracer_provider(provider);
            tracing_opentelemetry::layer().with_tracer(tracer)
        });
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(tracing_subscriber::fmt::layer())
            .with(otel)
            .try_init();
    });
    metrics_recorder()
}

fn install_propagator() {
    PROPAGATOR.call_once(|| global::set_text_map_propagator(TraceContextPropagator::new()));
}

fn span_exporter(service_name: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .ok()?;
    let resource = Resource::builder_empty()
        .with_attributes(resource_attributes(service_name))
        .build();
    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

fn resource_attributes(service_name: &str) -> Vec<KeyValue> {
    let instance = std::env::var("CAMGATE_SERVICE_INSTANCE_ID")
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok();
    std::iter::once(KeyValue::new("service.name", service_name.to_string()))
        .chain(instance.map(|id| KeyValue::new("service.instance.id", id)))
        .chain(RESOURCE_ENV.iter().filter_map(|(env, key)| {
            std::env::var(env)
                .ok()
                .map(|value| KeyValue::new(*key, value))
        }))
        .collect()
}

fn metrics_recorder() -> anyhow::Result<PrometheusHandle> {
    let mut slot = RECORDER.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("install metrics recorder")?;
    describe_metrics();
    *slot = Some(handle.clone());
    Ok(handle)
}

fn describe_metrics() {
    metrics::describe_counter!(
        "camgate_relay_total",
        "Stream relay attempts by format and outcome"
    );
    metrics::describe_gauge!("camgate_relay_active", "Relays currently streaming");
    metrics::describe_counter!(
        "camgate_relay_bytes_total",
        "Bytes relayed from the camera backend to callers"
    );
    metrics::describe_gauge!("camgate_push_connections", "Live push connections");
    metrics::describe_counter!(
        "camgate_dispatch_delivered_total",
        "Events queued onto push connections"
    );
    metrics::describe_counter!(
        "camgate_dispatch_dropped_total",
        "Events dropped because a push queue was full"
    );
    metrics::describe_counter!(
        "camgate_dispatch_pruned_total",
        "Closed push connections pruned during dispatch"
    );
    metrics::describe_counter!(
        "camgate_auth_failures_total",
        "Rejected caller credentials by surface"
    );
}

/// Parent context from inbound `traceparent`/`tracestate` headers.
pub fn trace_context_from_headers(headers: &HeaderMap) -> opentelemetry::Context {
    install_propagator();
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key)?.to_str().ok()
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        axum::routing::get(move || std::future::ready(handle.render())),
    )
}

pub async fn serve_metrics<F>(
    handle: PrometheusHandle,
    addr: SocketAddr,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "metrics listening");
    axum::serve(listener, metrics_router(handle).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}
