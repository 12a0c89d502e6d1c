//! Camera directory abstraction.
//!
//! # Purpose
//! The gateway never owns camera records; it only asks the directory whether a
//! tenant has a camera with a given key. Backends implement
//! [`CameraDirectory`] and are selected at startup.
use crate::model::Camera;
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait CameraDirectory: Send + Sync {
    /// Look up a camera by its tenant and key. A camera with the same key under
    /// another tenant is reported as `None`.
    async fn find_by_tenant_and_key(&self, tenant_id: &str, key: &str)
    -> StoreResult<Option<Camera>>;
    async fn health_check(&self) -> StoreResult<()>;
    fn backend_name(&self) -> &'static str;
}
