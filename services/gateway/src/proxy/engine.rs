//! Relay of a single upstream stream to a caller.
//!
//! # Purpose
//! Opens the upstream request for an already-authorized camera and turns the
//! upstream body into the caller's response body without buffering it.
//!
//! # Key invariants
//! - The connect and response-header phase is bounded by the configured
//!   timeout. An established body has no read timeout.
//! - The upstream body is pulled only as fast as the caller's connection
//!   accepts it. Dropping the response body (caller went away) drops the
//!   upstream response and closes its connection.
//! - An upstream error mid-body is surfaced as a body error, which aborts the
//!   caller's connection instead of ending the response cleanly.
//! - No retries and no redirects.
//!
//! # Security considerations
//! Upstream URLs (which embed the base URL) are stripped from `reqwest` errors
//! before logging, and only an allowlist of upstream headers reaches the caller.
use super::format::StreamFormat;
use super::upstream::UpstreamTarget;
use crate::config::UpstreamConfig;
use crate::ownership::UpstreamLocator;
use anyhow::Context;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

/// Upstream headers copied to the caller. Everything else (cookies, redirects,
/// server identification, hop-by-hop headers) stays behind.
const FORWARDED_HEADERS: [HeaderName; 6] = [
    header::CONTENT_TYPE,
    header::CACHE_CONTROL,
    header::EXPIRES,
    header::PRAGMA,
    header::LAST_MODIFIED,
    header::ETAG,
];

const DEFAULT_CACHE_CONTROL: &str = "no-cache";

#[derive(Debug, Clone)]
pub enum RelayMethod {
    Get,
    Post {
        body: Bytes,
        content_type: Option<HeaderValue>,
    },
}

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub tenant_id: String,
    pub locator: UpstreamLocator,
    pub format: StreamFormat,
    pub method: RelayMethod,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0} streams do not accept a request body")]
    MethodNotAllowed(StreamFormat),
    #[error("upstream timed out")]
    Timeout,
    #[error("upstream unavailable")]
    Unavailable,
}

impl ProxyError {
    fn outcome(&self) -> &'static str {
        match self {
            ProxyError::MethodNotAllowed(_) => "rejected",
            ProxyError::Timeout => "timeout",
            ProxyError::Unavailable => "unavailable",
        }
    }
}

#[derive(Clone)]
struct UpstreamCredentials {
    username: String,
    password: Option<String>,
}

#[derive(Clone)]
pub struct StreamProxy {
    client: reqwest::Client,
    target: UpstreamTarget,
    credentials: Option<UpstreamCredentials>,
    timeout: Duration,
}

impl std::fmt::Debug for StreamProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProxy")
            .field("target", &self.target)
            .field("credentials", &self.credentials.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl StreamProxy {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let target = UpstreamTarget::from_config(config)?;
        let timeout = config.timeout();
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .context("build upstream http client")?;
        let credentials = config.username.clone().map(|username| UpstreamCredentials {
            username,
            password: config.password.clone(),
        });
        Ok(Self {
            client,
            target,
            credentials,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Open the upstream stream and return the caller's response.
    pub async fn relay(&self, request: StreamRequest) -> Result<Response, ProxyError> {
        let format = request.format;
        match self.open(request).await {
            Ok(upstream) => {
                record_outcome(format, "ok");
                Ok(relay_response(format, upstream))
            }
            Err(err) => {
                record_outcome(format, err.outcome());
                Err(err)
            }
        }
    }

    async fn open(&self, request: StreamRequest) -> Result<reqwest::Response, ProxyError> {
        let StreamRequest {
            tenant_id,
            locator,
            format,
            method,
        } = request;
        let url = self.target.url_for(&locator.camera_key, format);
        let mut builder = match method {
            RelayMethod::Get => self.client.get(url),
            RelayMethod::Post { body, content_type } => {
                if !format.allows_post() {
                    return Err(ProxyError::MethodNotAllowed(format));
                }
                let content_type = content_type
                    .unwrap_or_else(|| HeaderValue::from_static(format.default_content_type()));
                self.client
                    .post(url)
                    .header(header::CONTENT_TYPE, content_type)
                    .body(body)
            }
        };
        if let Some(credentials) = &self.credentials {
            builder = builder.basic_auth(&credentials.username, credentials.password.as_deref());
        }

        let response = match tokio::time::timeout(self.timeout, builder.send()).await {
            Err(_) => {
                tracing::warn!(
                    %tenant_id,
                    camera_key = %locator.camera_key,
                    %format,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "upstream did not respond in time"
                );
                return Err(ProxyError::Timeout);
            }
            Ok(Err(err)) => {
                let timed_out = err.is_timeout();
                tracing::warn!(
                    %tenant_id,
                    camera_key = %locator.camera_key,
                    %format,
                    error = %err.without_url(),
                    "upstream request failed"
                );
                return Err(if timed_out {
                    ProxyError::Timeout
                } else {
                    ProxyError::Unavailable
                });
            }
            Ok(Ok(response)) => response,
        };

        if !response.status().is_success() {
            tracing::warn!(
                %tenant_id,
                camera_key = %locator.camera_key,
                %format,
                status = response.status().as_u16(),
                "upstream rejected stream request"
            );
            return Err(ProxyError::Unavailable);
        }
        tracing::debug!(
            %tenant_id,
            camera_key = %locator.camera_key,
            camera_id = %locator.camera_id,
            %format,
            "relay opened"
        );
        Ok(response)
    }
}

fn record_outcome(format: StreamFormat, outcome: &'static str) {
    metrics::counter!(
        "camgate_relay_total",
        "format" => format.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Caller-facing headers derived from the upstream response.
pub fn forwarded_headers(format: StreamFormat, upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in FORWARDED_HEADERS {
        if let Some(value) = upstream.get(&name) {
            headers.insert(name, value.clone());
        }
    }
    headers
        .entry(header::CONTENT_TYPE)
        .or_insert_with(|| HeaderValue::from_static(format.default_content_type()));
    headers
        .entry(header::CACHE_CONTROL)
        .or_insert_with(|| HeaderValue::from_static(DEFAULT_CACHE_CONTROL));
    headers
}

fn relay_response(format: StreamFormat, upstream: reqwest::Response) -> Response {
    let headers = forwarded_headers(format, upstream.headers());
    let active = ActiveRelay::start(format);
    let body = upstream.bytes_stream().map(move |chunk| match chunk {
        Ok(bytes) => {
            active.record(bytes.len());
            Ok(bytes)
        }
        Err(err) => {
            let err = err.without_url();
            tracing::warn!(format = %active.format, error = %err, "upstream stream interrupted");
            Err(err)
        }
    });
    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;
    *response.headers_mut() = headers;
    response
}

/// Lives as long as the caller's response body.
struct ActiveRelay {
    format: StreamFormat,
}

impl ActiveRelay {
    fn start(format: StreamFormat) -> Self {
        metrics::gauge!("camgate_relay_active").increment(1.0);
        Self { format }
    }

    fn record(&self, bytes: usize) {
        metrics::counter!("camgate_relay_bytes_total", "format" => self.format.as_str())
            .increment(bytes as u64);
    }
}

impl Drop for ActiveRelay {
    fn drop(&mut self) {
        metrics::gauge!("camgate_relay_active").decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn proxy(base_url: &str, timeout_ms: u64) -> StreamProxy {
        StreamProxy::new(&UpstreamConfig {
            base_url: base_url.to_string(),
            username: None,
            password: None,
            timeout_ms,
        })
        .expect("proxy")
    }

    fn request(format: StreamFormat, method: RelayMethod) -> StreamRequest {
        StreamRequest {
            tenant_id: "t1".to_string(),
            locator: UpstreamLocator {
                camera_id: Uuid::new_v4(),
                camera_key: "front_door".to_string(),
            },
            format,
            method,
        }
    }

    #[test]
    fn only_allowlisted_headers_are_forwarded() {
        let mut upstream = HeaderMap::new();
        upstream.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp2t"));
        upstream.insert(header::SERVER, HeaderValue::from_static("go2rtc"));
        upstream.insert(header::SET_COOKIE, HeaderValue::from_static("sid=1"));
        upstream.insert(header::LOCATION, HeaderValue::from_static("http://internal/"));
        upstream.insert(header::VIA, HeaderValue::from_static("1.1 cams"));
        upstream.insert(header::ETAG, HeaderValue::from_static("\"v1\""));

        let headers = forwarded_headers(StreamFormat::Hls, &upstream);
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "video/mp2t");
        assert_eq!(headers.get(header::ETAG).unwrap(), "\"v1\"");
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-cache");
        for stripped in [header::SERVER, header::SET_COOKIE, header::LOCATION, header::VIA] {
            assert!(headers.get(&stripped).is_none(), "{stripped} leaked");
        }
    }

    #[test]
    fn upstream_cache_directives_win_over_default() {
        let mut upstream = HeaderMap::new();
        upstream.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=1"));
        let headers = forwarded_headers(StreamFormat::Snapshot, &upstream);
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "max-age=1");
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "image/jpeg");
    }

    #[tokio::test]
    async fn post_is_rejected_for_non_signaling_formats() {
        // Nothing listens on port 1; a rejected request must never get that far.
        let proxy = proxy("http://127.0.0.1:1", 200);
        let err = proxy
            .relay(request(
                StreamFormat::Mjpeg,
                RelayMethod::Post {
                    body: Bytes::from_static(b"{}"),
                    content_type: None,
                },
            ))
            .await
            .expect_err("post on mjpeg");
        assert!(matches!(err, ProxyError::MethodNotAllowed(StreamFormat::Mjpeg)));
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let proxy = proxy(&format!("http://{addr}"), 2_000);
        let err = proxy
            .relay(request(StreamFormat::Hls, RelayMethod::Get))
            .await
            .expect_err("refused");
        assert!(matches!(err, ProxyError::Unavailable));
    }

    #[tokio::test]
    async fn silent_upstream_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let holder = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let proxy = proxy(&format!("http://{addr}"), 200);
        let started = std::time::Instant::now();
        let err = proxy
            .relay(request(StreamFormat::Snapshot, RelayMethod::Get))
            .await
            .expect_err("timeout");
        assert!(matches!(err, ProxyError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(2));
        holder.abort();
    }

    #[test]
    fn debug_hides_credentials_and_base() {
        let proxy = StreamProxy::new(&UpstreamConfig {
            base_url: "http://secret-host:1984".to_string(),
            username: Some("admin".to_string()),
            password: Some("hunter2".to_string()),
            timeout_ms: 1_000,
        })
        .expect("proxy");
        let debug = format!("{proxy:?}");
        assert!(!debug.contains("secret-host"));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("admin"));
    }
}
