#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use gateway::app::AppState;
use gateway::auth::token::{GatewayClaims, JwtVerifier, SigningKey, mint_token};
use gateway::config::{GatewayConfig, TokenKeyConfig};
use gateway::model::Camera;
use gateway::store::memory::InMemoryCameraDirectory;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;

pub const KID: &str = "k1";
pub const ISSUER: &str = "camgate-auth";
pub const AUDIENCE: &str = "camgate";
/// Camera key exercising every character that must survive as one path segment.
pub const AWKWARD_KEY: &str = "a/b c?d#e%f";

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub async fn read_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

pub fn signing_key() -> SigningKey {
    SigningKey::from_seed(KID, [7u8; 32])
}

pub fn token_for(tenant_id: &str, user_id: &str) -> String {
    let claims = GatewayClaims::new(
        ISSUER,
        AUDIENCE,
        tenant_id,
        user_id,
        Duration::from_secs(300),
    );
    mint_token(&signing_key(), &claims).expect("mint")
}

pub fn expired_token_for(tenant_id: &str, user_id: &str) -> String {
    let mut claims = GatewayClaims::new(
        ISSUER,
        AUDIENCE,
        tenant_id,
        user_id,
        Duration::from_secs(300),
    );
    claims.iat -= 7_200;
    claims.exp = claims.iat + 60;
    mint_token(&signing_key(), &claims).expect("mint")
}

pub fn test_config(upstream_base: &str) -> GatewayConfig {
    let key = signing_key();
    let mut config = GatewayConfig::default();
    config.upstream.base_url = upstream_base.to_string();
    config.upstream.timeout_ms = 2_000;
    config.tokens.keys = vec![TokenKeyConfig {
        kid: key.kid.clone(),
        public_key: key.public_key(),
    }];
    config
}

fn camera(tenant_id: &str, key: &str) -> Camera {
    Camera {
        id: Uuid::new_v4(),
        tenant_id: tenant_id.to_string(),
        key: key.to_string(),
        label: String::new(),
    }
}

/// t1 owns `front_door`, `bare`, `broken`, `endless`, `flaky` and
/// [`AWKWARD_KEY`]; t2 owns `warehouse`.
pub fn directory() -> InMemoryCameraDirectory {
    InMemoryCameraDirectory::with_cameras([
        camera("t1", "front_door"),
        camera("t1", "bare"),
        camera("t1", "broken"),
        camera("t1", "endless"),
        camera("t1", "flaky"),
        camera("t1", AWKWARD_KEY),
        camera("t2", "warehouse"),
    ])
    .expect("directory")
}

pub fn state_with(config: &GatewayConfig) -> AppState {
    let verifier = JwtVerifier::from_config(&config.tokens).expect("verifier");
    AppState::new(config, Arc::new(directory()), Arc::new(verifier)).expect("state")
}

pub fn state(upstream_base: &str) -> AppState {
    state_with(&test_config(upstream_base))
}

/// Serve `app` on an ephemeral loopback port.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    addr
}

/// Stand-in for the media backend, mounted under `/media`.
///
/// `GET /media/{key}/{suffix}` echoes `key|suffix` with headers the gateway
/// must strip. Special keys:
/// - `bare` answers with no headers;
/// - `broken` answers 500;
/// - `endless` streams chunks until its body is dropped, then flips
///   [`FakeUpstream::endless_dropped`];
/// - `flaky` sends `part` and then fails the body.
///
/// `POST /media/{key}/webrtc` echoes the request body.
#[derive(Clone)]
pub struct FakeUpstream {
    pub addr: SocketAddr,
    state: UpstreamState,
}

#[derive(Clone, Default)]
struct UpstreamState {
    hits: Arc<AtomicUsize>,
    endless_dropped: Arc<AtomicBool>,
}

impl FakeUpstream {
    pub async fn start() -> Self {
        let state = UpstreamState::default();
        let app = Router::new()
            .route(
                "/media/:key/:suffix",
                axum::routing::get(upstream_get).post(upstream_post),
            )
            .with_state(state.clone());
        let addr = serve(app).await;
        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/media", self.addr)
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// Whether the `endless` body has been dropped by the server.
    pub fn endless_dropped(&self) -> bool {
        self.state.endless_dropped.load(Ordering::SeqCst)
    }
}

/// Flags its owner's body as dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn endless_body(dropped: Arc<AtomicBool>) -> Body {
    let chunks = futures::stream::unfold(DropFlag(dropped), |flag| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Some((Ok::<_, Infallible>(Bytes::from_static(b"chunk")), flag))
    });
    Body::from_stream(chunks)
}

fn flaky_body() -> Body {
    let chunks = futures::stream::unfold(0u8, |step| async move {
        match step {
            0 => Some((Ok(Bytes::from_static(b"part")), 1)),
            1 => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Some((Err(std::io::Error::other("camera went away")), 2))
            }
            _ => None,
        }
    });
    Body::from_stream(chunks)
}

async fn upstream_get(
    State(state): State<UpstreamState>,
    Path((key, suffix)): Path<(String, String)>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    match key.as_str() {
        "broken" => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from("backend exploded"))
            .expect("response"),
        "bare" => Response::new(Body::from("frame")),
        "endless" => Response::new(endless_body(state.endless_dropped.clone())),
        "flaky" => Response::new(flaky_body()),
        _ => Response::builder()
            .header(header::CONTENT_TYPE, "video/test")
            .header(header::CACHE_CONTROL, "max-age=5")
            .header(header::SERVER, "media-backend/1.0")
            .header(header::SET_COOKIE, "session=abc")
            .header(header::VIA, "1.1 internal-proxy")
            .header("x-backend-node", "node-7")
            .body(Body::from(format!("{key}|{suffix}")))
            .expect("response"),
    }
}

async fn upstream_post(
    State(state): State<UpstreamState>,
    Path((_key, suffix)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| header::HeaderValue::from_static("application/octet-stream"));
    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header("x-upstream-suffix", suffix)
        .body(Body::from(body))
        .expect("response")
}

/// A listener that accepts connections and never answers.
pub async fn silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    addr
}
