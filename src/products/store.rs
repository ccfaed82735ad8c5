use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::repo;
use crate::db::Db;
use crate::error::AppError;
use crate::products::repo_types::{NewProduct, Product};

/// Persistence for product records.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Assigns a fresh id and persists the product.
    async fn create(&self, product: NewProduct) -> Result<Product, AppError>;
    async fn get(&self, product_id: Uuid) -> Result<Product, AppError>;
    /// All products, oldest first.
    async fn list(&self) -> Result<Vec<Product>, AppError>;
    /// Removes the product and returns what was removed.
    async fn delete(&self, product_id: Uuid) -> Result<Product, AppError>;
}

#[derive(Clone)]
pub struct PgProductStore {
    db: Db,
}

impl PgProductStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn closed_tx() -> AppError {
    AppError::Internal(anyhow::anyhow!("scoped transaction is already closed"))
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn create(&self, product: NewProduct) -> Result<Product, AppError> {
        let product_id = Uuid::new_v4();
        let row = match &self.db {
            Db::Pool(pool) => repo::insert(pool, product_id, &product).await?,
            Db::Scoped(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(closed_tx)?;
                repo::insert(&mut **tx, product_id, &product).await?
            }
        };
        debug!(%product_id, "product inserted");
        Ok(row)
    }

    async fn get(&self, product_id: Uuid) -> Result<Product, AppError> {
        let row = match &self.db {
            Db::Pool(pool) => repo::find_by_id(pool, product_id).await?,
            Db::Scoped(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(closed_tx)?;
                repo::find_by_id(&mut **tx, product_id).await?
            }
        };
        row.ok_or(AppError::NotFound)
    }

    async fn list(&self) -> Result<Vec<Product>, AppError> {
        let rows = match &self.db {
            Db::Pool(pool) => repo::list_all(pool).await?,
            Db::Scoped(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(closed_tx)?;
                repo::list_all(&mut **tx).await?
            }
        };
        Ok(rows)
    }

    async fn delete(&self, product_id: Uuid) -> Result<Product, AppError> {
        let row = match &self.db {
            Db::Pool(pool) => repo::delete_by_id(pool, product_id).await?,
            Db::Scoped(tx) => {
                let mut guard = tx.lock().await;
                let tx = guard.as_mut().ok_or_else(closed_tx)?;
                repo::delete_by_id(&mut **tx, product_id).await?
            }
        };
        let row = row.ok_or(AppError::NotFound)?;
        debug!(%product_id, "product deleted");
        Ok(row)
    }
}
