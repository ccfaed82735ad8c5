use std::sync::Arc;

use anyhow::Context;
use tracing::warn;

use crate::config::AppConfig;
use crate::db::{self, Db};
use crate::products::{PgProductStore, ProductStore};
use crate::storage::{BlobResolver, S3BlobResolver};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub products: Arc<dyn ProductStore>,
    pub blobs: Arc<dyn BlobResolver>,
}

impl AppState {
    /// Production wiring: pooled Postgres with migrations applied, S3 for images.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let pool = db::connect_with_retry(&config.database).await?;
        db::run_migrations(&pool).await?;

        let blobs = S3BlobResolver::new(&config.storage)
            .await
            .context("build blob resolver")?;
        if let Err(e) = blobs.ensure_bucket().await {
            warn!(error = %format!("{e:#}"), "could not ensure image bucket; uploads may fail");
        }

        Ok(Self::from_parts(
            Arc::new(config),
            Arc::new(PgProductStore::new(Db::Pool(pool))),
            Arc::new(blobs),
        ))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        products: Arc<dyn ProductStore>,
        blobs: Arc<dyn BlobResolver>,
    ) -> Self {
        Self {
            config,
            products,
            blobs,
        }
    }
}
