//! Test support: deterministic blob storage, an in-memory product store and a
//! transaction-scoped Postgres harness.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::{AppConfig, DatabaseConfig, ImageUploadPolicy, StorageConfig};
use crate::db::{self, Db};
use crate::error::AppError;
use crate::products::{NewProduct, PgProductStore, Product, ProductStore};
use crate::state::AppState;
use crate::storage::{blob_key, BlobRef, BlobResolver};

pub const MOCK_SAS_TOKEN: &str = "mock_sas_token";
pub const MOCK_BLOB_URL: &str =
    "https://testaccount.blob.core.windows.net/test-images/mock_blob.jpg?mock_sas_token";

pub const SETUP_ATTEMPTS: u32 = 10;
pub const SETUP_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Config for tests. Nothing is read from the environment.
pub fn test_config(database_url: &str) -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        database: DatabaseConfig {
            url: database_url.into(),
            max_connections: 5,
            connect_retries: SETUP_ATTEMPTS,
            retry_delay_secs: SETUP_RETRY_DELAY.as_secs(),
            connect_timeout_secs: SETUP_RETRY_DELAY.as_secs(),
        },
        storage: StorageConfig {
            account_name: "testaccount".into(),
            account_key: "testkey".into(),
            container_name: "test-images".into(),
            url_expiry_hours: 1,
            endpoint: None,
            region: "us-east-1".into(),
        },
        image_upload_policy: ImageUploadPolicy::Abort,
    }
}

/// Blob resolver that never leaves the process. Every upload resolves to
/// [`MOCK_BLOB_URL`]; keys are recorded for assertions.
#[derive(Default)]
pub struct FixedBlobResolver {
    fail: bool,
    uploads: Mutex<Vec<String>>,
    discarded: Mutex<Vec<String>>,
}

impl FixedBlobResolver {
    /// A resolver whose uploads always fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn discarded(&self) -> Vec<String> {
        self.discarded.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BlobResolver for FixedBlobResolver {
    async fn upload(&self, _body: Bytes, name: &str, content_type: &str) -> anyhow::Result<BlobRef> {
        if self.fail {
            anyhow::bail!("mock blob store refused the upload");
        }
        let key = blob_key(name, content_type);
        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.push(key.clone());
        }
        Ok(BlobRef {
            key,
            url: MOCK_BLOB_URL.to_string(),
            expires_at: OffsetDateTime::now_utc() + Duration::from_secs(3600),
        })
    }

    async fn discard(&self, key: &str) -> anyhow::Result<()> {
        if let Ok(mut discarded) = self.discarded.lock() {
            discarded.push(key.to_string());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryProductStore {
    rows: RwLock<Vec<Product>>,
}

impl InMemoryProductStore {
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn create(&self, product: NewProduct) -> Result<Product, AppError> {
        let row = product.into_product(Uuid::new_v4(), OffsetDateTime::now_utc());
        self.rows.write().await.push(row.clone());
        Ok(row)
    }

    async fn get(&self, product_id: Uuid) -> Result<Product, AppError> {
        self.rows
            .read()
            .await
            .iter()
            .find(|p| p.product_id == product_id)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn list(&self) -> Result<Vec<Product>, AppError> {
        Ok(self.rows.read().await.clone())
    }

    async fn delete(&self, product_id: Uuid) -> Result<Product, AppError> {
        let mut rows = self.rows.write().await;
        let idx = rows
            .iter()
            .position(|p| p.product_id == product_id)
            .ok_or(AppError::NotFound)?;
        Ok(rows.remove(idx))
    }
}

/// Connects with bounded retries and rebuilds the schema from scratch.
///
/// Panics when the database never becomes reachable: no test can run without it.
pub async fn prepare_database(database_url: &str) -> PgPool {
    let cfg = test_config(database_url).database;
    let pool = match db::connect_with_retry(&cfg).await {
        Ok(pool) => pool,
        Err(e) => panic!("could not connect to PostgreSQL for the product service: {e}"),
    };
    if let Err(e) = db::reset_schema(&pool).await {
        panic!("could not reset the product schema: {e:#}");
    }
    pool
}

/// One test's view of the database: a single open transaction that every
/// request of the test runs through, discarded at the end.
///
/// Dropping it without calling [`TestTransaction::rollback`] rolls back too.
pub struct TestTransaction {
    db: Db,
}

impl TestTransaction {
    pub async fn begin(pool: &PgPool) -> anyhow::Result<Self> {
        let tx = pool.begin().await.context("begin test transaction")?;
        Ok(Self { db: Db::scoped(tx) })
    }

    /// Application state whose store is bound to this transaction.
    pub fn state(&self, blobs: Arc<dyn BlobResolver>) -> AppState {
        AppState::from_parts(
            Arc::new(test_config("postgres://scoped")),
            Arc::new(PgProductStore::new(self.db.clone())),
            blobs,
        )
    }

    pub async fn rollback(self) -> anyhow::Result<()> {
        if let Db::Scoped(tx) = &self.db {
            if let Some(tx) = tx.lock().await.take() {
                tx.rollback().await.context("rollback test transaction")?;
            }
        }
        Ok(())
    }
}
