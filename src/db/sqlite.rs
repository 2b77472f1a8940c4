use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{error, info};

use super::models::{Alert, ImageRow, NewAlert, StoredImage};
use super::{AlertStore, StoreError};

const MIGRATION: &str = include_str!("../../migrations/sqlite/20250101000000_create_alerts.sql");

#[derive(Clone)]
pub struct SqliteAlertStore {
    pool: SqlitePool,
}

impl SqliteAlertStore {
    /// Opens (creating if needed) the database file at `path`.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// A private in-memory database. A single pinned connection keeps it alive.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        info!("Running SQLite migrations...");
        sqlx::raw_sql(MIGRATION).execute(&pool).await.map_err(|e| {
            error!(error = %e, "Failed to execute SQLite migrations.");
            StoreError::Migration(e.to_string())
        })?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl AlertStore for SqliteAlertStore {
    async fn insert(&self, alert: NewAlert) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO alerts (image_data, image_filename, label, confidence, timestamp)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(alert.image_data)
        .bind(alert.image_filename)
        .bind(alert.label)
        .bind(alert.confidence)
        .bind(alert.timestamp)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn latest(&self) -> Result<Option<Alert>, StoreError> {
        let alert = sqlx::query_as::<_, Alert>(
            "SELECT id, image_filename, label, confidence, timestamp
             FROM alerts ORDER BY timestamp DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(alert)
    }

    async fn list_all(&self) -> Result<Vec<Alert>, StoreError> {
        let alerts = sqlx::query_as::<_, Alert>(
            "SELECT id, image_filename, label, confidence, timestamp
             FROM alerts ORDER BY timestamp DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(alerts)
    }

    async fn get_image(&self, id: i64) -> Result<StoredImage, StoreError> {
        sqlx::query_as::<_, ImageRow>("SELECT image_data, image_filename FROM alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(StoredImage::from)
            .ok_or(StoreError::NotFound(id))
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
