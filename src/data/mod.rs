//! PostgreSQL persistence for the cache and the job queue.

pub mod cache;
pub mod jobs;

pub use cache::PgCacheStore;
pub use jobs::PgJobQueue;

use crate::catalog::{CatalogError, ResourceKey};
use anyhow::Context;
use sqlx::ConnectOptions;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Failure of the cache store or job queue backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("no live job for key '{0}'")]
    MissingJob(ResourceKey),
    #[error("corrupt stored row: {0}")]
    Corrupt(String),
}

impl From<CatalogError> for StoreError {
    fn from(e: CatalogError) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Connect to PostgreSQL and run pending migrations.
pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let connect_options = PgConnectOptions::from_str(database_url)
        .context("Failed to parse database URL")?
        .log_statements(tracing::log::LevelFilter::Debug)
        .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

    let pool = PgPoolOptions::new()
        .min_connections(0)
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(4))
        .idle_timeout(Duration::from_secs(60 * 2))
        .max_lifetime(Duration::from_secs(60 * 30))
        .connect_with(connect_options)
        .await
        .context("Failed to create database pool")?;

    info!(
        max_connections = 8,
        acquire_timeout = "4s",
        idle_timeout = "2m",
        max_lifetime = "30m",
        "database pool established"
    );

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    info!("database migrations completed");

    Ok(pool)
}

/// Verify the database connection is alive.
pub async fn ping(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}
