//! In-memory camera directory.
//!
//! # Purpose
//! Keeps cameras in a `HashMap` guarded by `tokio::sync::RwLock`, keyed by
//! `(tenant_id, key)`. Used for local development, demos and tests, optionally
//! seeded from a YAML file at startup.
//!
//! # Durability
//! Not durable; the directory is rebuilt from the seed file on restart.
use super::{CameraDirectory, StoreError, StoreResult};
use crate::model::{Camera, CameraKey};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryCameraDirectory {
    cameras: RwLock<HashMap<CameraKey, Camera>>,
}

#[derive(Debug, Deserialize)]
struct CameraSeedFile {
    #[serde(default)]
    cameras: Vec<Camera>,
}

impl InMemoryCameraDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cameras(cameras: impl IntoIterator<Item = Camera>) -> StoreResult<Self> {
        let mut map = HashMap::new();
        for camera in cameras {
            let key = camera.lookup_key();
            if map.contains_key(&key) {
                return Err(StoreError::Conflict(format!(
                    "duplicate camera key {} for tenant {}",
                    key.key, key.tenant_id
                )));
            }
            map.insert(key, camera);
        }
        Ok(Self {
            cameras: RwLock::new(map),
        })
    }

    /// Load a YAML document of the form `cameras: [{tenant_id, key, label}]`.
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read camera seed file {}", path.display()))?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let seed: CameraSeedFile =
            serde_yaml::from_str(contents).with_context(|| "parse camera seed yaml")?;
        let directory = Self::with_cameras(seed.cameras)?;
        Ok(directory)
    }

    pub async fn insert(&self, camera: Camera) -> StoreResult<()> {
        let key = camera.lookup_key();
        let mut cameras = self.cameras.write().await;
        if cameras.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "duplicate camera key {} for tenant {}",
                key.key, key.tenant_id
            )));
        }
        cameras.insert(key, camera);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.cameras.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cameras.read().await.is_empty()
    }
}

#[async_trait]
impl CameraDirectory for InMemoryCameraDirectory {
    async fn find_by_tenant_and_key(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> StoreResult<Option<Camera>> {
        let cameras = self.cameras.read().await;
        Ok(cameras.get(&CameraKey::new(tenant_id, key)).cloned())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
