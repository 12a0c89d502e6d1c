use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:1984";
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_TOKEN_ISSUER: &str = "camgate-auth";
pub const DEFAULT_TOKEN_AUDIENCE: &str = "camgate";
pub const DEFAULT_TOKEN_LEEWAY_SECS: u64 = 30;
pub const DEFAULT_PING_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 90_000;
pub const DEFAULT_PG_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_PG_ACQUIRE_TIMEOUT_MS: u64 = 2_000;

// Gateway configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub internal_bind: SocketAddr,
    pub internal_token: Option<String>,
    pub upstream: UpstreamConfig,
    pub tokens: TokenConfig,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub cameras_file: Option<PathBuf>,
    pub push: PushConfig,
}

#[derive(Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: u64,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// The base URL and credentials are deployment secrets.
impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &"<redacted>")
            .field("username", &self.username.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub issuer: String,
    pub audience: String,
    /// Verification keys; the first entry is the current key.
    pub keys: Vec<TokenKeyConfig>,
    pub leeway_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenKeyConfig {
    pub kid: String,
    pub public_key: [u8; 32],
}

impl TokenKeyConfig {
    /// Parse a `kid=base64url(ed25519 public key)` comma-separated list.
    pub fn parse_list(value: &str) -> Result<Vec<Self>> {
        let mut keys = Vec::new();
        for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (kid, encoded) = entry
                .split_once('=')
                .with_context(|| format!("token key entry missing '=': {entry}"))?;
            let kid = kid.trim();
            if kid.is_empty() {
                bail!("token key entry has an empty kid");
            }
            let bytes = URL_SAFE_NO_PAD
                .decode(encoded.trim())
                .with_context(|| format!("decode public key for kid {kid}"))?;
            let public_key: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("public key for kid {kid} must be 32 bytes"))?;
            if keys.iter().any(|existing: &TokenKeyConfig| existing.kid == kid) {
                bail!("duplicate token key kid: {kid}");
            }
            keys.push(Self {
                kid: kid.to_string(),
                public_key,
            });
        }
        Ok(keys)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "pg" => Ok(Self::Postgres),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    #[serde(default = "default_pg_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_pg_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_ms", &self.acquire_timeout_ms)
            .finish()
    }
}

fn default_pg_max_connections() -> u32 {
    DEFAULT_PG_MAX_CONNECTIONS
}

fn default_pg_acquire_timeout_ms() -> u64 {
    DEFAULT_PG_ACQUIRE_TIMEOUT_MS
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub queue_capacity: usize,
    pub ping_interval_ms: u64,
    pub idle_timeout_ms: u64,
}

impl PushConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
struct GatewayConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    internal_bind: Option<String>,
    internal_token: Option<String>,
    upstream_url: Option<String>,
    upstream_username: Option<String>,
    upstream_password: Option<String>,
    upstream_timeout_ms: Option<u64>,
    token_issuer: Option<String>,
    token_audience: Option<String>,
    token_keys: Option<String>,
    token_leeway_secs: Option<u64>,
    storage_backend: Option<String>,
    postgres: Option<PostgresConfig>,
    cameras_file: Option<PathBuf>,
    push_queue_capacity: Option<usize>,
    ping_interval_ms: Option<u64>,
    idle_timeout_ms: Option<u64>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8443)),
            metrics_bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            internal_bind: SocketAddr::from(([127, 0, 0, 1], 8081)),
            internal_token: None,
            upstream: UpstreamConfig {
                base_url: DEFAULT_UPSTREAM_URL.to_string(),
                username: None,
                password: None,
                timeout_ms: DEFAULT_UPSTREAM_TIMEOUT_MS,
            },
            tokens: TokenConfig {
                issuer: DEFAULT_TOKEN_ISSUER.to_string(),
                audience: DEFAULT_TOKEN_AUDIENCE.to_string(),
                keys: Vec::new(),
                leeway_secs: DEFAULT_TOKEN_LEEWAY_SECS,
            },
            storage: StorageBackend::Memory,
            postgres: None,
            cameras_file: None,
            push: PushConfig {
                queue_capacity: camgate_hub::DEFAULT_PUSH_QUEUE_CAPACITY,
                ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
                idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            },
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self::read_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::read_env()?;
        if let Ok(path) = std::env::var("CAMGATE_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read CAMGATE_CONFIG: {path}"))?;
            let override_cfg: GatewayConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse gateway config yaml")?;
            config.apply_override(override_cfg)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn read_env() -> Result<Self> {
        let defaults = Self::default();
        let storage = env_parse("CAMGATE_STORAGE_BACKEND", defaults.storage)?;
        let postgres = match std::env::var("CAMGATE_PG_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: env_parse("CAMGATE_PG_MAX_CONNECTIONS", DEFAULT_PG_MAX_CONNECTIONS)?,
                acquire_timeout_ms: env_parse(
                    "CAMGATE_PG_ACQUIRE_TIMEOUT_MS",
                    DEFAULT_PG_ACQUIRE_TIMEOUT_MS,
                )?,
            }),
            Err(_) => None,
        };
        let keys = match std::env::var("CAMGATE_TOKEN_KEYS") {
            Ok(value) => {
                TokenKeyConfig::parse_list(&value).with_context(|| "parse CAMGATE_TOKEN_KEYS")?
            }
            Err(_) => Vec::new(),
        };

        Ok(Self {
            bind_addr: env_parse("CAMGATE_BIND", defaults.bind_addr)?,
            metrics_bind: env_parse("CAMGATE_METRICS_BIND", defaults.metrics_bind)?,
            internal_bind: env_parse("CAMGATE_INTERNAL_BIND", defaults.internal_bind)?,
            internal_token: env_optional("CAMGATE_INTERNAL_TOKEN"),
            upstream: UpstreamConfig {
                base_url: std::env::var("CAMGATE_UPSTREAM_URL")
                    .unwrap_or(defaults.upstream.base_url),
                username: env_optional("CAMGATE_UPSTREAM_USERNAME"),
                password: env_optional("CAMGATE_UPSTREAM_PASSWORD"),
                timeout_ms: env_parse("CAMGATE_UPSTREAM_TIMEOUT_MS", DEFAULT_UPSTREAM_TIMEOUT_MS)?,
            },
            tokens: TokenConfig {
                issuer: std::env::var("CAMGATE_TOKEN_ISSUER").unwrap_or(defaults.tokens.issuer),
                audience: std::env::var("CAMGATE_TOKEN_AUDIENCE")
                    .unwrap_or(defaults.tokens.audience),
                keys,
                leeway_secs: env_parse("CAMGATE_TOKEN_LEEWAY_SECS", DEFAULT_TOKEN_LEEWAY_SECS)?,
            },
            storage,
            postgres,
            cameras_file: env_optional("CAMGATE_CAMERAS_FILE").map(PathBuf::from),
            push: PushConfig {
                queue_capacity: env_parse(
                    "CAMGATE_PUSH_QUEUE_CAPACITY",
                    defaults.push.queue_capacity,
                )?,
                ping_interval_ms: env_parse("CAMGATE_PING_INTERVAL_MS", DEFAULT_PING_INTERVAL_MS)?,
                idle_timeout_ms: env_parse("CAMGATE_IDLE_TIMEOUT_MS", DEFAULT_IDLE_TIMEOUT_MS)?,
            },
        })
    }

    fn apply_override(&mut self, override_cfg: GatewayConfigOverride) -> Result<()> {
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.internal_bind {
            self.internal_bind = value.parse().with_context(|| "parse internal_bind")?;
        }
        if let Some(value) = override_cfg.internal_token {
            self.internal_token = Some(value);
        }
        if let Some(value) = override_cfg.upstream_url {
            self.upstream.base_url = value;
        }
        if let Some(value) = override_cfg.upstream_username {
            self.upstream.username = Some(value);
        }
        if let Some(value) = override_cfg.upstream_password {
            self.upstream.password = Some(value);
        }
        if let Some(value) = override_cfg.upstream_timeout_ms {
            self.upstream.timeout_ms = value;
        }
        if let Some(value) = override_cfg.token_issuer {
            self.tokens.issuer = value;
        }
        if let Some(value) = override_cfg.token_audience {
            self.tokens.audience = value;
        }
        if let Some(value) = override_cfg.token_keys {
            self.tokens.keys =
                TokenKeyConfig::parse_list(&value).with_context(|| "parse token_keys")?;
        }
        if let Some(value) = override_cfg.token_leeway_secs {
            self.tokens.leeway_secs = value;
        }
        if let Some(value) = override_cfg.storage_backend {
            self.storage = value.parse().with_context(|| "parse storage_backend")?;
        }
        if let Some(value) = override_cfg.postgres {
            self.postgres = Some(value);
        }
        if let Some(value) = override_cfg.cameras_file {
            self.cameras_file = Some(value);
        }
        if let Some(value) = override_cfg.push_queue_capacity {
            self.push.queue_capacity = value;
        }
        if let Some(value) = override_cfg.ping_interval_ms {
            self.push.ping_interval_ms = value;
        }
        if let Some(value) = override_cfg.idle_timeout_ms {
            self.push.idle_timeout_ms = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tokens.keys.is_empty() {
            bail!("CAMGATE_TOKEN_KEYS must name at least one verification key");
        }
        if self.upstream.timeout_ms == 0 {
            bail!("upstream timeout must be greater than zero");
        }
        if self.push.queue_capacity == 0 {
            bail!("push queue capacity must be greater than zero");
        }
        if self.push.ping_interval_ms == 0 {
            bail!("ping interval must be greater than zero");
        }
        if self.push.idle_timeout_ms < self.push.ping_interval_ms {
            bail!("idle timeout must not be shorter than the ping interval");
        }
        if self.storage == StorageBackend::Postgres && self.postgres.is_none() {
            bail!("CAMGATE_PG_URL is required for the postgres storage backend");
        }
        Ok(())
    }
}

fn env_optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("parse {key}: {err}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const ENV_KEYS: &[&str] = &[
        "CAMGATE_BIND",
        "CAMGATE_METRICS_BIND",
        "CAMGATE_INTERNAL_BIND",
        "CAMGATE_INTERNAL_TOKEN",
        "CAMGATE_UPSTREAM_URL",
        "CAMGATE_UPSTREAM_USERNAME",
        "CAMGATE_UPSTREAM_PASSWORD",
        "CAMGATE_UPSTREAM_TIMEOUT_MS",
        "CAMGATE_TOKEN_ISSUER",
        "CAMGATE_TOKEN_AUDIENCE",
        "CAMGATE_TOKEN_KEYS",
        "CAMGATE_TOKEN_LEEWAY_SECS",
        "CAMGATE_STORAGE_BACKEND",
        "CAMGATE_PG_URL",
        "CAMGATE_PG_MAX_CONNECTIONS",
        "CAMGATE_PG_ACQUIRE_TIMEOUT_MS",
        "CAMGATE_CAMERAS_FILE",
        "CAMGATE_PUSH_QUEUE_CAPACITY",
        "CAMGATE_PING_INTERVAL_MS",
        "CAMGATE_IDLE_TIMEOUT_MS",
        "CAMGATE_CONFIG",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            unsafe {
                std::env::remove_var(key);
            }
        }
    }

    fn set_env(key: &str, value: &str) {
        unsafe {
            std::env::set_var(key, value);
        }
    }

    fn encoded_key(byte: u8) -> String {
        URL_SAFE_NO_PAD.encode([byte; 32])
    }

    #[test]
    #[serial]
    fn from_env_uses_defaults_with_keys() {
        clear_env();
        set_env("CAMGATE_TOKEN_KEYS", &format!("k1={}", encoded_key(1)));
        let config = GatewayConfig::from_env().expect("config");
        assert_eq!(config.bind_addr, "0.0.0.0:8443".parse().unwrap());
        assert_eq!(config.metrics_bind, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.internal_bind, "127.0.0.1:8081".parse().unwrap());
        assert_eq!(config.upstream.base_url, DEFAULT_UPSTREAM_URL);
        assert_eq!(config.upstream.timeout(), Duration::from_secs(30));
        assert_eq!(config.tokens.keys.len(), 1);
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.push.queue_capacity, 64);
        assert_eq!(config.push.ping_interval(), Duration::from_secs(30));
        assert_eq!(config.push.idle_timeout(), Duration::from_secs(90));
        clear_env();
    }

    #[test]
    #[serial]
    fn from_env_requires_token_keys() {
        clear_env();
        let err = GatewayConfig::from_env().expect_err("keys required");
        assert!(err.to_string().contains("CAMGATE_TOKEN_KEYS"));
    }

    #[test]
    #[serial]
    fn from_env_names_the_bad_variable() {
        clear_env();
        set_env("CAMGATE_TOKEN_KEYS", &format!("k1={}", encoded_key(1)));
        set_env("CAMGATE_UPSTREAM_TIMEOUT_MS", "soon");
        let err = GatewayConfig::from_env().expect_err("bad timeout");
        assert!(err.to_string().contains("CAMGATE_UPSTREAM_TIMEOUT_MS"));
        clear_env();
    }

    #[test]
    #[serial]
    fn postgres_backend_requires_url() {
        clear_env();
        set_env("CAMGATE_TOKEN_KEYS", &format!("k1={}", encoded_key(1)));
        set_env("CAMGATE_STORAGE_BACKEND", "postgres");
        let err = GatewayConfig::from_env().expect_err("pg url");
        assert!(err.to_string().contains("CAMGATE_PG_URL"));
        set_env("CAMGATE_PG_URL", "postgres://localhost/cams");
        let config = GatewayConfig::from_env().expect("config");
        let pg = config.postgres.expect("postgres");
        assert_eq!(pg.max_connections, DEFAULT_PG_MAX_CONNECTIONS);
        clear_env();
    }

    #[test]
    #[serial]
    fn yaml_overrides_env() {
        clear_env();
        set_env("CAMGATE_TOKEN_KEYS", &format!("k1={}", encoded_key(1)));
        let mut file = tempfile_path("camgate-config");
        writeln!(
            file.1,
            "bind_addr: \"127.0.0.1:9000\"\nupstream_url: \"http://cams.internal:1984\"\nping_interval_ms: 1000\nidle_timeout_ms: 3000\ntoken_keys: \"k2={},k3={}\"",
            encoded_key(2),
            encoded_key(3)
        )
        .expect("write yaml");
        set_env("CAMGATE_CONFIG", file.0.to_str().expect("utf8 path"));
        let config = GatewayConfig::from_env_or_yaml().expect("config");
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.upstream.base_url, "http://cams.internal:1984");
        assert_eq!(config.push.ping_interval_ms, 1000);
        assert_eq!(config.tokens.keys[0].kid, "k2");
        assert_eq!(config.tokens.keys[1].kid, "k3");
        let _ = fs::remove_file(&file.0);
        clear_env();
    }

    #[test]
    fn parse_key_list_rejects_bad_entries() {
        assert!(TokenKeyConfig::parse_list("nokid").is_err());
        assert!(TokenKeyConfig::parse_list("=abc").is_err());
        assert!(TokenKeyConfig::parse_list("k1=!!!").is_err());
        let short = URL_SAFE_NO_PAD.encode([1u8; 16]);
        assert!(TokenKeyConfig::parse_list(&format!("k1={short}")).is_err());
        let dup = format!("k1={},k1={}", encoded_key(1), encoded_key(2));
        assert!(TokenKeyConfig::parse_list(&dup).is_err());
    }

    #[test]
    fn idle_timeout_shorter_than_ping_is_rejected() {
        let mut config = GatewayConfig::default();
        config.tokens.keys = TokenKeyConfig::parse_list(&format!("k1={}", encoded_key(1)))
            .expect("keys");
        config.push.idle_timeout_ms = 10;
        config.push.ping_interval_ms = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn upstream_debug_redacts_secrets() {
        let config = UpstreamConfig {
            base_url: "http://secret-host:1984".to_string(),
            username: Some("admin".to_string()),
            password: Some("hunter2".to_string()),
            timeout_ms: 10,
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-host"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("admin"));
    }

    fn tempfile_path(prefix: &str) -> (PathBuf, fs::File) {
        let path = std::env::temp_dir().join(format!("{prefix}-{}.yaml", uuid::Uuid::new_v4()));
        let file = fs::File::create(&path).expect("create temp file");
        (path, file)
    }
}
