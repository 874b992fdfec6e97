use crate::analytics::models::{AnalyticsAggregate, ClickEvent};
use crate::models::{NewUrl, UrlRecord};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short code already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Other(err.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables, etc.)
    async fn init(&self) -> Result<()>;

    /// Insert a link under `url.code`.
    ///
    /// Fails with [`StorageError::Conflict`] when an active link holds the
    /// code. A link holding the code that expired at or before
    /// `url.created_at` is purged in the same transaction and the code reused.
    async fn insert_url(&self, url: &NewUrl) -> StorageResult<UrlRecord>;

    /// Get a link by short code
    async fn get_by_code(&self, code: &str) -> Result<Option<UrlRecord>>;

    /// Get a link by id
    async fn get_by_id(&self, id: &str) -> Result<Option<UrlRecord>>;

    /// Whether a link with this id is still stored
    async fn url_exists(&self, id: &str) -> Result<bool>;

    /// All links, most recently created first
    async fn list(&self) -> Result<Vec<UrlRecord>>;

    /// Hard delete a link and its analytics; returns the removed record
    async fn delete(&self, id: &str) -> Result<Option<UrlRecord>>;

    /// Delete every link whose expiry is at or before `now_ms`
    async fn purge_expired(&self, now_ms: i64) -> Result<u64>;

    /// Apply one click to the link's counters and rollups atomically.
    ///
    /// Returns `false` when the link no longer exists.
    async fn record_click(&self, event: &ClickEvent) -> Result<bool>;

    /// Consistent snapshot of a link's rollups, `None` for unknown links
    async fn load_analytics(&self, url_id: &str) -> Result<Option<AnalyticsAggregate>>;
}
