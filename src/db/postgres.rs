use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use super::models::{Alert, ImageRow, NewAlert, StoredImage};
use super::{AlertStore, StoreError};

const MIGRATION: &str = include_str!("../../migrations/postgres/20250101000000_create_alerts.sql");

#[derive(Clone)]
pub struct PostgresAlertStore {
    pool: PgPool,
}

impl PostgresAlertStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> Result<Self, StoreError> {
        info!("Running PostgreSQL migrations...");
        sqlx::raw_sql(MIGRATION).execute(&pool).await.map_err(|e| {
            error!(error = %e, "Failed to execute PostgreSQL migrations.");
            StoreError::Migration(e.to_string())
        })?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl AlertStore for PostgresAlertStore {
    async fn insert(&self, alert: NewAlert) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO alerts (image_data, image_filename, label, confidence, timestamp)
             VALUES ($1, $2, $3, $4, $5)
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
        sqlx::query_as::<_, ImageRow>(
            "SELECT image_data, image_filename FROM alerts WHERE id = $1",
        )
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
