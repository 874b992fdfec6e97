use crate::analytics::models::{AnalyticsAggregate, ClickEvent};
use crate::models::{NewUrl, UrlRecord};
use crate::storage::{Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Cached storage wrapper for short code lookups.
///
/// Only the redirect path (`get_by_code`) is served from cache. Link fields
/// it relies on (target, password hash, expiry) never change after creation,
/// so a cached hit is only confirmed with a primary-key existence check
/// before it is returned. Deletes made by another process (the admin CLI) or
/// racing with a lookup therefore take effect on the next lookup.
/// Click counts in cached records may lag; listings and analytics always read
/// through.
pub struct CachedStorage {
    /// Underlying storage implementation
    inner: Arc<dyn Storage>,
    /// Read cache for code lookups; misses are not cached
    read_cache: Cache<String, UrlRecord>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, max_cache_entries: u64, ttl_secs: u64) -> Self {
        let read_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(ttl_secs.max(1)))
            .build();

        Self { inner, read_cache }
    }

    /// Invalidate cache entry for a specific short code
    async fn invalidate_cache(&self, code: &str) {
        self.read_cache.invalidate(code).await;
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn insert_url(&self, url: &NewUrl) -> StorageResult<UrlRecord> {
        let result = self.inner.insert_url(url).await?;

        // Replaces an expired link that held this code
        self.read_cache
            .insert(result.code.clone(), result.clone())
            .await;

        Ok(result)
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<UrlRecord>> {
        if let Some(cached) = self.read_cache.get(code).await {
            if self.inner.url_exists(&cached.id).await? {
                return Ok(Some(cached));
            }
            self.invalidate_cache(code).await;
        }

        let result = self.inner.get_by_code(code).await?;

        if let Some(ref record) = result {
            self.read_cache
                .insert(code.to_string(), record.clone())
                .await;
        }

        Ok(result)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<UrlRecord>> {
        self.inner.get_by_id(id).await
    }

    async fn url_exists(&self, id: &str) -> Result<bool> {
        self.inner.url_exists(id).await
    }

    async fn list(&self) -> Result<Vec<UrlRecord>> {
        self.inner.list().await
    }

    async fn delete(&self, id: &str) -> Result<Option<UrlRecord>> {
        let removed = self.inner.delete(id).await?;

        if let Some(ref record) = removed {
            self.invalidate_cache(&record.code).await;
        }

        Ok(removed)
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<u64> {
        let purged = self.inner.purge_expired(now_ms).await?;

        if purged > 0 {
            self.read_cache.invalidate_all();
        }

        Ok(purged)
    }

    async fn record_click(&self, event: &ClickEvent) -> Result<bool> {
        self.inner.record_click(event).await
    }

    async fn load_analytics(&self, url_id: &str) -> Result<Option<AnalyticsAggregate>> {
        self.inner.load_analytics(url_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Expiration;
    use crate::storage::SqliteStorage;

    async fn setup() -> (Arc<dyn Storage>, CachedStorage) {
        let sqlite = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        sqlite.init().await.unwrap();
        let inner: Arc<dyn Storage> = Arc::new(sqlite);
        let cached = CachedStorage::new(Arc::clone(&inner), 100, 300);
        (inner, cached)
    }

    fn new_url(id: &str, code: &str) -> NewUrl {
        NewUrl {
            id: id.to_string(),
            code: code.to_string(),
            original_url: "https://example.com".to_string(),
            password_hash: None,
            expiration: Expiration::Never,
            expires_at: None,
            created_at: 1_000,
            custom_alias: true,
        }
    }

    #[tokio::test]
    async fn test_miss_then_insert_is_visible() {
        let (_inner, cached) = setup().await;

        assert!(cached.get_by_code("cached1").await.unwrap().is_none());
        cached.insert_url(&new_url("id-1", "cached1")).await.unwrap();

        let found = cached.get_by_code("cached1").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some("id-1".to_string()));
    }

    #[tokio::test]
    async fn test_delete_invalidates_code() {
        let (_inner, cached) = setup().await;

        cached.insert_url(&new_url("id-2", "cached2")).await.unwrap();
        assert!(cached.get_by_code("cached2").await.unwrap().is_some());

        let removed = cached.delete("id-2").await.unwrap();
        assert!(removed.is_some());
        assert!(cached.get_by_code("cached2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_behind_cache_is_seen() {
        let (inner, cached) = setup().await;

        cached.insert_url(&new_url("id-3", "cached3")).await.unwrap();
        assert!(cached.get_by_code("cached3").await.unwrap().is_some());

        // Removed without going through the cache
        assert!(inner.delete("id-3").await.unwrap().is_some());
        assert!(cached.get_by_code("cached3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reclaimed_code_behind_cache_resolves_new_link() {
        let (inner, cached) = setup().await;

        cached.insert_url(&new_url("id-4", "cached4")).await.unwrap();
        assert!(cached.get_by_code("cached4").await.unwrap().is_some());

        inner.delete("id-4").await.unwrap();
        inner.insert_url(&new_url("id-5", "cached4")).await.unwrap();

        let found = cached.get_by_code("cached4").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some("id-5".to_string()));
    }
}
