//! EdDSA JWT verification (and minting for tests and local tooling).
//!
//! # Purpose
//! Validates caller tokens issued by the login service: signature (Ed25519
//! only), issuer, audience, expiry with bounded leeway, and the presence of the
//! user (`sub`) and tenant (`tid`) claims.
//!
//! # Key rotation
//! The verifier holds an ordered key set (current first, then previous keys).
//! When the token header names a `kid` that key is tried first; the remaining
//! keys are still tried so a token signed just before a rotation verifies.
//!
//! # Security model
//! - The algorithm is pinned to EdDSA; `none`, HS* and RS* tokens are rejected
//!   by `jsonwebtoken` before any key is used.
//! - A valid signature alone is not enough: `tid` and `sub` must be non-empty.
use super::{AuthError, TokenVerifier};
use crate::config::{TokenConfig, TokenKeyConfig};
use crate::model::Caller;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::SigningKey as Ed25519SigningKey;
use ed25519_dalek::pkcs8::EncodePrivateKey;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Claims carried by caller tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayClaims {
    pub iss: String,
    pub aud: String,
    /// User id.
    pub sub: String,
    /// Tenant id.
    pub tid: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl GatewayClaims {
    pub fn new(
        issuer: &str,
        audience: &str,
        tenant_id: &str,
        user_id: &str,
        ttl: Duration,
    ) -> Self {
        let now = now_epoch_seconds();
        Self {
            iss: issuer.to_string(),
            aud: audience.to_string(),
            sub: user_id.to_string(),
            tid: tenant_id.to_string(),
            exp: now + ttl.as_secs() as i64,
            iat: now,
            jti: None,
        }
    }
}

/// Public half of a signing key, ready for verification.
#[derive(Clone)]
pub struct VerificationKey {
    pub kid: String,
    decoding_key: DecodingKey,
}

impl VerificationKey {
    pub fn from_public_bytes(kid: &str, public_key: &[u8; 32]) -> Result<Self, AuthError> {
        // jsonwebtoken builds Ed25519 decoding keys from the JWK `x` component.
        let x = URL_SAFE_NO_PAD.encode(public_key);
        let decoding_key = DecodingKey::from_ed_components(&x)?;
        Ok(Self {
            kid: kid.to_string(),
            decoding_key,
        })
    }
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

/// Private signing key: a raw 32-byte Ed25519 seed and its `kid`.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    seed: [u8; 32],
}

impl SigningKey {
    pub fn from_seed(kid: &str, seed: [u8; 32]) -> Self {
        Self {
            kid: kid.to_string(),
            seed,
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        Ed25519SigningKey::from_bytes(&self.seed)
            .verifying_key()
            .to_bytes()
    }

    pub fn verification_key(&self) -> Result<VerificationKey, AuthError> {
        VerificationKey::from_public_bytes(&self.kid, &self.public_key())
    }

    fn encoding_key(&self) -> Result<EncodingKey, AuthError> {
        let der = Ed25519SigningKey::from_bytes(&self.seed)
            .to_pkcs8_der()
            .map_err(|err| AuthError::Key(format!("encode Ed25519 key: {err}")))?;
        Ok(EncodingKey::from_ed_der(der.as_bytes()))
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

/// Sign claims with an Ed25519 key, embedding its `kid` in the header.
pub fn mint_token(key: &SigningKey, claims: &GatewayClaims) -> Result<String, AuthError> {
    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some(key.kid.clone());
    Ok(jsonwebtoken::encode(&header, claims, &key.encoding_key()?)?)
}

#[derive(Debug, Clone)]
pub struct JwtVerifier {
    keys: Vec<VerificationKey>,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(
        issuer: &str,
        audience: &str,
        leeway_secs: u64,
        keys: Vec<VerificationKey>,
    ) -> Result<Self, AuthError> {
        if keys.is_empty() {
            return Err(AuthError::Key("no verification keys configured".to_string()));
        }
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_audience(&[audience]);
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = leeway_secs;
        Ok(Self { keys, validation })
    }

    pub fn from_config(config: &TokenConfig) -> Result<Self, AuthError> {
        let keys = config
            .keys
            .iter()
            .map(|TokenKeyConfig { kid, public_key }| {
                VerificationKey::from_public_bytes(kid, public_key)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(&config.issuer, &config.audience, config.leeway_secs, keys)
    }

    fn ordered_keys<'a>(&'a self, kid: Option<&str>) -> Vec<&'a VerificationKey> {
        let mut ordered: Vec<&VerificationKey> = Vec::with_capacity(self.keys.len());
        if let Some(kid) = kid
            && let Some(found) = self.keys.iter().find(|key| key.kid == kid)
        {
            ordered.push(found);
        }
        ordered.extend(
            self.keys
                .iter()
                .filter(|key| kid.is_none_or(|kid| key.kid != kid)),
        );
        ordered
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Caller, AuthError> {
        let header = jsonwebtoken::decode_header(token)?;
        if header.alg != Algorithm::EdDSA {
            return Err(AuthError::Jwt(jsonwebtoken::errors::Error::from(
                jsonwebtoken::errors::ErrorKind::InvalidAlgorithm,
            )));
        }

        let mut last_err = None;
        for key in self.ordered_keys(header.kid.as_deref()) {
            match jsonwebtoken::decode::<GatewayClaims>(token, &key.decoding_key, &self.validation)
            {
                Ok(data) => {
                    let claims = data.claims;
                    if claims.tid.trim().is_empty() {
                        return Err(AuthError::IncompleteClaims("tid"));
                    }
                    if claims.sub.trim().is_empty() {
                        return Err(AuthError::IncompleteClaims("sub"));
                    }
                    return Ok(Caller {
                        user_id: claims.sub,
                        tenant_id: claims.tid,
                    });
                }
                // Claim failures are key-independent; trying other keys won't help.
                Err(err)
                    if !matches!(
                        err.kind(),
                        jsonwebtoken::errors::ErrorKind::InvalidSignature
                    ) =>
                {
                    return Err(err.into());
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(AuthError::Jwt(last_err.unwrap_or_else(|| {
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidToken)
        })))
    }
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}
