use std::time::Duration;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::DatabaseConfig;

/// Opens the shared pool. Per-request acquisition and release is left to sqlx.
pub async fn connect(cfg: &DatabaseConfig, timeout: Duration) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(timeout)
        .connect(&cfg.url);

    tokio::time::timeout(timeout, pool)
        .await
        .context("timed out connecting to database")?
        .context("connect to database")
}

pub async fn migrate(pool: &PgPool) {
    if let Err(e) = sqlx::migrate!("./migrations").run(pool).await {
        tracing::warn!(error = %e, "migrations folder not found or migration failed; continuing");
    }
}
