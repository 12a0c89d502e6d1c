//! Postgres-backed camera directory.
//!
//! # What this module is
//! A read-only view of the CRUD layer's `cameras` table:
//!
//! ```sql
//! cameras(id uuid primary key, tenant_id text not null, key text not null,
//!         label text not null, unique (tenant_id, key))
//! ```
//!
//! The gateway never migrates or writes this table; it belongs to the service
//! that manages cameras. Every lookup is a single parameterized query filtered
//! by both tenant and key, so a key owned by another tenant never matches.
//!
//! # Operational notes
//! - Pool size and acquire timeout are explicit so a stalled database fails
//!   requests quickly instead of hanging relays.
//! - The database URL may carry credentials and is never logged.
use super::{CameraDirectory, StoreResult};
use crate::config::PostgresConfig;
use crate::model::Camera;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

const FIND_CAMERA_SQL: &str =
    "SELECT id, tenant_id, key, label FROM cameras WHERE tenant_id = $1 AND key = $2";

#[derive(Debug, Clone)]
pub struct PostgresCameraDirectory {
    pool: PgPool,
}

#[derive(Debug, Clone, FromRow)]
struct DbCamera {
    id: Uuid,
    tenant_id: String,
    key: String,
    label: String,
}

impl From<DbCamera> for Camera {
    fn from(row: DbCamera) -> Self {
        Camera {
            id: row.id,
            tenant_id: row.tenant_id,
            key: row.key,
            label: row.label,
        }
    }
}

impl PostgresCameraDirectory {
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        let connect_options = PgConnectOptions::from_str(&pg.url)?;
        let pool = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CameraDirectory for PostgresCameraDirectory {
    async fn find_by_tenant_and_key(
        &self,
        tenant_id: &str,
        key: &str,
    ) -> StoreResult<Option<Camera>> {
        let row = sqlx::query_as::<_, DbCamera>(FIND_CAMERA_SQL)
            .bind(tenant_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Camera::from))
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
