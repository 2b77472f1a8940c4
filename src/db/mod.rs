use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub mod models;
pub mod postgres;
pub mod sqlite;

use self::models::{Alert, NewAlert, StoredImage};
pub use self::postgres::PostgresAlertStore;
pub use self::sqlite::SqliteAlertStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Alert {0} not found")]
    NotFound(i64),
}

/// Append-only storage for alert records.
///
/// Ordering for `latest` and `list_all` is by `timestamp` descending; equal
/// timestamps are ordered by id descending, so the most recently inserted of
/// a tie comes first.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persists a new alert and returns its freshly assigned id.
    async fn insert(&self, alert: NewAlert) -> Result<i64, StoreError>;

    async fn latest(&self) -> Result<Option<Alert>, StoreError>;

    async fn list_all(&self) -> Result<Vec<Alert>, StoreError>;

    /// Returns the image bytes of alert `id`, or `StoreError::NotFound`.
    async fn get_image(&self, id: i64) -> Result<StoredImage, StoreError>;

    async fn count(&self) -> Result<i64, StoreError>;
}

/// Selects the storage backend. Postgres when `database_url` is set, SQLite otherwise.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: Option<String>,
    pub sqlite_path: String,
}

pub async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn AlertStore>, StoreError> {
    match config.database_url.as_deref() {
        Some(url) => {
            info!("Using PostgreSQL alert store.");
            let store = PostgresAlertStore::connect(url).await?;
            Ok(Arc::new(store))
        }
        None => {
            info!(path = %config.sqlite_path, "DATABASE_URL not set, using SQLite alert store.");
            let store = SqliteAlertStore::open(&config.sqlite_path).await?;
            Ok(Arc::new(store))
        }
    }
}
