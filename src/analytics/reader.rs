use anyhow::Result;
use std::sync::Arc;

use crate::analytics::models::AnalyticsAggregate;
use crate::storage::Storage;

/// Read-only access to per-link analytics
#[derive(Clone)]
pub struct AnalyticsReader {
    storage: Arc<dyn Storage>,
}

impl AnalyticsReader {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Snapshot of every click committed so far; `None` for unknown links
    pub async fn get(&self, url_id: &str) -> Result<Option<AnalyticsAggregate>> {
        self.storage.load_analytics(url_id).await
    }
}
