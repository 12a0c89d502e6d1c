//! Ownership resolution for stream requests.
//!
//! A caller may only reach cameras of its own tenant. Lookups are keyed by
//! `(tenant_id, camera_key)` so a key owned by another tenant behaves exactly
//! like a key that does not exist; callers cannot discover other tenants'
//! cameras.
use crate::model::Camera;
use crate::store::{CameraDirectory, StoreError};
use thiserror::Error;
use uuid::Uuid;

pub const MAX_CAMERA_KEY_LEN: usize = 256;

/// Where the relay should read from. Holds only the camera identity; the
/// upstream base URL is composed in by the proxy and never leaves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamLocator {
    pub camera_id: Uuid,
    pub camera_key: String,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid camera key: {0}")]
    InvalidKey(&'static str),
    #[error("camera not found")]
    NotFound,
    #[error("camera lookup failed: {0}")]
    LookupFailed(#[source] StoreError),
}

pub fn validate_camera_key(key: &str) -> Result<(), ResolveError> {
    if key.trim().is_empty() {
        return Err(ResolveError::InvalidKey("camera key must not be empty"));
    }
    if key.len() > MAX_CAMERA_KEY_LEN {
        return Err(ResolveError::InvalidKey("camera key is too long"));
    }
    // Dot segments would collapse in the upstream path.
    if key == "." || key == ".." {
        return Err(ResolveError::InvalidKey("camera key is reserved"));
    }
    if key.chars().any(char::is_control) {
        return Err(ResolveError::InvalidKey(
            "camera key must not contain control characters",
        ));
    }
    Ok(())
}

/// Resolve a caller's camera key within its own tenant.
pub async fn resolve(
    directory: &dyn CameraDirectory,
    tenant_id: &str,
    camera_key: &str,
) -> Result<UpstreamLocator, ResolveError> {
    validate_camera_key(camera_key)?;
    let camera = directory
        .find_by_tenant_and_key(tenant_id, camera_key)
        .await
        .map_err(ResolveError::LookupFailed)?;
    match camera {
        Some(Camera {
            id,
            tenant_id: owner,
            key,
            ..
        }) if owner == tenant_id && key == camera_key => Ok(UpstreamLocator {
            camera_id: id,
            camera_key: key,
        }),
        // A directory answering with another tenant's camera is treated as a miss.
        Some(_) | None => Err(ResolveError::NotFound),
    }
}
