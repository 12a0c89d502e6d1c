//! Camera model definitions.
//!
//! # Purpose
//! Defines the camera record the gateway reads from the directory. Cameras are
//! owned and written by the CRUD layer; `(tenant_id, key)` is unique.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Camera {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub tenant_id: String,
    pub key: String,
    #[serde(default)]
    pub label: String,
}

impl Camera {
    pub fn lookup_key(&self) -> CameraKey {
        CameraKey {
            tenant_id: self.tenant_id.clone(),
            key: self.key.clone(),
        }
    }
}

/// Directory index: a key is only meaningful together with its tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CameraKey {
    pub tenant_id: String,
    pub key: String,
}

impl CameraKey {
    pub fn new(tenant_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            key: key.into(),
        }
    }
}
