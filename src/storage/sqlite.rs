use crate::analytics::models::{
    AnalyticsAggregate, ClickEvent, DailyStat, Dimension, IpAddressStats,
};
use crate::models::{format_millis, NewUrl, UrlRecord};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const URL_COLUMNS: &str = "id, code, original_url, password_hash, expiration, expires_at, created_at, custom_alias, click_count";

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let mut pool_options = SqlitePoolOptions::new();

        if in_memory {
            // An in-memory database lives only as long as its connection
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
            pool_options = pool_options.max_connections(max_connections.max(1));
        }

        let pool = pool_options.connect_with(options).await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn fetch_url(&self, column: &str, value: &str) -> Result<Option<UrlRecord>> {
        let url = sqlx::query_as::<_, UrlRecord>(&format!(
            "SELECT {URL_COLUMNS} FROM urls WHERE {column} = ?"
        ))
        .bind(value)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(url)
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS urls (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                original_url TEXT NOT NULL,
                password_hash TEXT,
                expiration TEXT NOT NULL DEFAULT 'never',
                expires_at INTEGER,
                created_at INTEGER NOT NULL,
                custom_alias INTEGER NOT NULL DEFAULT 0,
                click_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_urls_created_at ON urls(created_at)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_urls_expires_at ON urls(expires_at)")
            .execute(self.pool.as_ref())
            .await?;

        // Raw click log, kept for auditing and recomputation
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url_id TEXT NOT NULL REFERENCES urls(id) ON DELETE CASCADE,
                occurred_at INTEGER NOT NULL,
                ip_address TEXT NOT NULL,
                country TEXT NOT NULL,
                state TEXT NOT NULL,
                city TEXT NOT NULL,
                device TEXT NOT NULL,
                browser TEXT NOT NULL,
                operating_system TEXT NOT NULL,
                referrer TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_click_events_url ON click_events(url_id, occurred_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS url_dimension_counts (
                url_id TEXT NOT NULL REFERENCES urls(id) ON DELETE CASCADE,
                dimension TEXT NOT NULL,
                bucket_key TEXT NOT NULL,
                clicks INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (url_id, dimension, bucket_key)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS url_daily_stats (
                url_id TEXT NOT NULL REFERENCES urls(id) ON DELETE CASCADE,
                day TEXT NOT NULL,
                clicks INTEGER NOT NULL DEFAULT 0,
                unique_visitors INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (url_id, day)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS url_daily_visitors (
                url_id TEXT NOT NULL REFERENCES urls(id) ON DELETE CASCADE,
                day TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                PRIMARY KEY (url_id, day, ip_address)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS url_hourly_stats (
                url_id TEXT NOT NULL REFERENCES urls(id) ON DELETE CASCADE,
                hour INTEGER NOT NULL,
                clicks INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (url_id, hour)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS url_visitors (
                url_id TEXT NOT NULL REFERENCES urls(id) ON DELETE CASCADE,
                ip_address TEXT NOT NULL,
                country TEXT NOT NULL,
                state TEXT NOT NULL,
                city TEXT NOT NULL,
                clicks INTEGER NOT NULL DEFAULT 0,
                last_access INTEGER NOT NULL,
                PRIMARY KEY (url_id, ip_address)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn insert_url(&self, url: &NewUrl) -> StorageResult<UrlRecord> {
        let mut tx = self.pool.begin().await?;

        // Reclaim the code from a link that has already expired
        let reclaimed = sqlx::query(
            r#"
            DELETE FROM urls
            WHERE code = ? AND expires_at IS NOT NULL AND expires_at <= ?
            "#,
        )
        .bind(&url.code)
        .bind(url.created_at)
        .execute(&mut *tx)
        .await?;

        if reclaimed.rows_affected() > 0 {
            tracing::info!(code = %url.code, "reclaimed short code from expired link");
        }

        let result = sqlx::query(
            r#"
            INSERT INTO urls (id, code, original_url, password_hash, expiration, expires_at, created_at, custom_alias, click_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(code) DO NOTHING
            "#,
        )
        .bind(&url.id)
        .bind(&url.code)
        .bind(&url.original_url)
        .bind(&url.password_hash)
        .bind(url.expiration.as_str())
        .bind(url.expires_at)
        .bind(url.created_at)
        .bind(url.custom_alias)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        let record = sqlx::query_as::<_, UrlRecord>(&format!(
            "SELECT {URL_COLUMNS} FROM urls WHERE id = ?"
        ))
        .bind(&url.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(record)
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<UrlRecord>> {
        self.fetch_url("code", code).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<UrlRecord>> {
        self.fetch_url("id", id).await
    }

    async fn url_exists(&self, id: &str) -> Result<bool> {
        let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM urls WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(row.is_some())
    }

    async fn list(&self) -> Result<Vec<UrlRecord>> {
        let urls = sqlx::query_as::<_, UrlRecord>(&format!(
            "SELECT {URL_COLUMNS} FROM urls ORDER BY created_at DESC, rowid DESC"
        ))
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(urls)
    }

    async fn delete(&self, id: &str) -> Result<Option<UrlRecord>> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, UrlRecord>(&format!(
            "SELECT {URL_COLUMNS} FROM urls WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_none() {
            return Ok(None);
        }

        sqlx::query("DELETE FROM urls WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(existing)
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM urls
            WHERE expires_at IS NOT NULL AND expires_at <= ?
            "#,
        )
        .bind(now_ms)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn record_click(&self, event: &ClickEvent) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE urls SET click_count = click_count + 1 WHERE id = ?")
            .bind(&event.url_id)
            .execute(&mut *tx)
            .await?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO click_events (url_id, occurred_at, ip_address, country, state, city, device, browser, operating_system, referrer)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.url_id)
        .bind(event.timestamp)
        .bind(&event.ip_address)
        .bind(&event.country)
        .bind(&event.state)
        .bind(&event.city)
        .bind(&event.device)
        .bind(&event.browser)
        .bind(&event.operating_system)
        .bind(&event.referrer)
        .execute(&mut *tx)
        .await?;

        for (dimension, key) in event.dimension_keys() {
            sqlx::query(
                r#"
                INSERT INTO url_dimension_counts (url_id, dimension, bucket_key, clicks)
                VALUES (?, ?, ?, 1)
                ON CONFLICT(url_id, dimension, bucket_key) DO UPDATE SET clicks = clicks + 1
                "#,
            )
            .bind(&event.url_id)
            .bind(dimension.as_str())
            .bind(key)
            .execute(&mut *tx)
            .await?;
        }

        let day = event.day();

        let first_visit_today = sqlx::query(
            r#"
            INSERT INTO url_daily_visitors (url_id, day, ip_address)
            VALUES (?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&event.url_id)
        .bind(&day)
        .bind(&event.ip_address)
        .execute(&mut *tx)
        .await?
        .rows_affected() as i64;

        sqlx::query(
            r#"
            INSERT INTO url_daily_stats (url_id, day, clicks, unique_visitors)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(url_id, day) DO UPDATE SET
                clicks = clicks + 1,
                unique_visitors = unique_visitors + excluded.unique_visitors
            "#,
        )
        .bind(&event.url_id)
        .bind(&day)
        .bind(first_visit_today)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO url_hourly_stats (url_id, hour, clicks)
            VALUES (?, ?, 1)
            ON CONFLICT(url_id, hour) DO UPDATE SET clicks = clicks + 1
            "#,
        )
        .bind(&event.url_id)
        .bind(event.hour() as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO url_visitors (url_id, ip_address, country, state, city, clicks, last_access)
            VALUES (?, ?, ?, ?, ?, 1, ?)
            ON CONFLICT(url_id, ip_address) DO UPDATE SET
                clicks = clicks + 1,
                country = excluded.country,
                state = excluded.state,
                city = excluded.city,
                last_access = excluded.last_access
            "#,
        )
        .bind(&event.url_id)
        .bind(&event.ip_address)
        .bind(&event.country)
        .bind(&event.state)
        .bind(&event.city)
        .bind(event.timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(true)
    }

    async fn load_analytics(&self, url_id: &str) -> Result<Option<AnalyticsAggregate>> {
        // One read transaction so every rollup comes from the same snapshot
        let mut tx = self.pool.begin().await?;

        let clicks = sqlx::query_scalar::<_, i64>("SELECT click_count FROM urls WHERE id = ?")
            .bind(url_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(clicks) = clicks else {
            return Ok(None);
        };

        let mut aggregate = AnalyticsAggregate::empty();
        aggregate.clicks = clicks.max(0) as u64;

        aggregate.unique_visitors =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM url_visitors WHERE url_id = ?")
                .bind(url_id)
                .fetch_one(&mut *tx)
                .await?
                .max(0) as u64;

        let dimension_rows = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT dimension, bucket_key, clicks FROM url_dimension_counts WHERE url_id = ?",
        )
        .bind(url_id)
        .fetch_all(&mut *tx)
        .await?;

        for (dimension, key, count) in dimension_rows {
            match Dimension::parse(&dimension) {
                Some(dimension) => {
                    aggregate
                        .dimension_mut(dimension)
                        .insert(key, count.max(0) as u64);
                }
                None => warn!(%dimension, "ignoring unknown analytics dimension"),
            }
        }

        let daily = sqlx::query_as::<_, (String, i64, i64)>(
            r#"
            SELECT day, clicks, unique_visitors
            FROM url_daily_stats
            WHERE url_id = ?
            ORDER BY day ASC
            "#,
        )
        .bind(url_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|(date, clicks, unique_visitors)| DailyStat {
            date,
            clicks: clicks.max(0) as u64,
            unique_visitors: unique_visitors.max(0) as u64,
        })
        .collect::<Vec<_>>();

        aggregate.click_history = daily.clone();
        aggregate.daily_stats = daily;

        let hourly = sqlx::query_as::<_, (i64, i64)>(
            "SELECT hour, clicks FROM url_hourly_stats WHERE url_id = ?",
        )
        .bind(url_id)
        .fetch_all(&mut *tx)
        .await?;

        for (hour, count) in hourly {
            if let Some(bucket) = aggregate.hourly_stats.get_mut(hour as usize) {
                bucket.clicks = count.max(0) as u64;
            }
        }

        aggregate.ip_addresses = sqlx::query_as::<_, (String, String, String, String, i64, i64)>(
            r#"
            SELECT ip_address, country, state, city, clicks, last_access
            FROM url_visitors
            WHERE url_id = ?
            ORDER BY last_access DESC, ip_address ASC
            "#,
        )
        .bind(url_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|(ip, country, state, city, clicks, last_access)| IpAddressStats {
            ip,
            country,
            state,
            city,
            clicks: clicks.max(0) as u64,
            last_access: format_millis(last_access),
        })
        .collect();

        tx.commit().await?;

        Ok(Some(aggregate))
    }
}
