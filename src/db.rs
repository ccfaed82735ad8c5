use std::sync::Arc;

use anyhow::Context;
use sqlx::{migrate::Migrator, postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{config::DatabaseConfig, error::AppError};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub type ScopedTx = Arc<Mutex<Option<Transaction<'static, Postgres>>>>;

/// Where store statements are executed.
///
/// `Pool` hands every statement its own pooled connection. `Scoped` funnels
/// every statement through one open transaction; the owner of the transaction
/// decides whether it is committed or rolled back.
#[derive(Clone)]
pub enum Db {
    Pool(PgPool),
    Scoped(ScopedTx),
}

impl Db {
    pub fn scoped(tx: Transaction<'static, Postgres>) -> Self {
        Db::Scoped(Arc::new(Mutex::new(Some(tx))))
    }
}

/// Connects to Postgres, retrying a not-yet-ready server a bounded number of
/// times with a fixed delay between attempts. Each attempt gives up after
/// `connect_timeout`.
pub async fn connect_with_retry(cfg: &DatabaseConfig) -> Result<PgPool, AppError> {
    let attempts = cfg.connect_retries.max(1);
    let mut attempt = 1;
    loop {
        match PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.connect_timeout())
            .connect(&cfg.url)
            .await
        {
            Ok(pool) => {
                info!(attempt, "connected to database");
                return Ok(pool);
            }
            Err(source) if attempt >= attempts => {
                return Err(AppError::StoreUnavailable { attempts, source });
            }
            Err(e) => {
                warn!(attempt, attempts, error = %e, "database not ready; retrying");
                tokio::time::sleep(cfg.retry_delay()).await;
                attempt += 1;
            }
        }
    }
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    MIGRATOR.run(pool).await.context("run migrations")?;
    Ok(())
}

/// Drops every table, migration bookkeeping included, and rebuilds the schema.
pub async fn reset_schema(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("DROP TABLE IF EXISTS products")
        .execute(pool)
        .await
        .context("drop products")?;
    sqlx::query("DROP TABLE IF EXISTS _sqlx_migrations")
        .execute(pool)
        .await
        .context("drop migration history")?;
    run_migrations(pool).await?;
    info!("schema reset");
    Ok(())
}
