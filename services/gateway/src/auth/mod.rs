//! Caller authentication.
//!
//! # Purpose
//! Turns a bearer token into a [`Caller`] (user and tenant identity). Token
//! issuance lives outside the gateway; this module only verifies.
//!
//! # Security considerations
//! - Tokens are never logged.
//! - Every rejection maps to the same caller-facing `unauthorized` response;
//!   the reason is kept for server-side logs only.
pub mod token;

use crate::model::Caller;
use axum::http::HeaderMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("token claims incomplete: {0}")]
    IncompleteClaims(&'static str),
    #[error("key error: {0}")]
    Key(String),
}

/// Verifies caller tokens.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Caller, AuthError>;
}

/// Bearer credential from the `Authorization` header.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Pick the caller token from the header, falling back to `?token=` for
/// players and browsers that cannot set headers.
pub fn request_token<'a>(headers: &'a HeaderMap, query_token: Option<&'a str>) -> Option<&'a str> {
    extract_bearer(headers).or_else(|| query_token.map(str::trim).filter(|t| !t.is_empty()))
}

/// Verify the request's token, recording failures for the given surface.
pub fn authenticate(
    verifier: &dyn TokenVerifier,
    token: Option<&str>,
    surface: &'static str,
) -> Result<Caller, AuthError> {
    let result = match token {
        Some(token) => verifier.verify(token),
        None => Err(AuthError::MissingToken),
    };
    if let Err(err) = &result {
        metrics::counter!("camgate_auth_failures_total", "surface" => surface).increment(1);
        tracing::debug!(surface, error = %err, "caller authentication failed");
    }
    result
}
