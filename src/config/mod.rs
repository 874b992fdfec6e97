use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    /// Prefix used to build the `shortUrl` of every link
    pub public_base_url: String,
    pub cors_allowed_origins: Vec<String>,
    pub short_code: ShortCodeConfig,
    pub cache: CacheConfig,
    /// Seconds between background purges of expired links (0 disables)
    pub purge_interval_secs: u64,
    pub analytics: AnalyticsConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortCodeConfig {
    pub length: usize,
    pub max_attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket address only
    None,
    /// Honour `Forwarded` / `X-Forwarded-For`
    Standard,
    /// Honour `CF-Connecting-IP`
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Number of pipeline shards (one writer task each)
    pub workers: usize,
    /// Queue bound per shard; events beyond it are dropped
    pub queue_size: usize,
    /// Storage retries per click event before it is dropped
    pub record_retries: u32,
    /// Upper bound for a single geolocation lookup
    pub lookup_timeout_ms: u64,
    pub geoip_city_db_path: Option<String>,
    pub geoip_api_url: Option<String>,
    pub ip_anonymization: bool,
    pub trusted_proxy_mode: TrustedProxyMode,
    pub trusted_proxies: Vec<String>,
    pub num_trusted_proxies: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// When empty, management routes are open
    pub api_keys: Vec<String>,
}

impl Default for ShortCodeConfig {
    fn default() -> Self {
        Self {
            length: 6,
            max_attempts: 5,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 300,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_size: 10_000,
            record_retries: 3,
            lookup_timeout_ms: 500,
            geoip_city_db_path: None,
            geoip_api_url: None,
            ip_anonymization: false,
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: vec![],
            num_trusted_proxies: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./snaplink.db".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            server: ServerConfig::default(),
            public_base_url: "http://localhost:5000".to_string(),
            cors_allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            short_code: ShortCodeConfig::default(),
            cache: CacheConfig::default(),
            purge_interval_secs: 300,
            analytics: AnalyticsConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

fn env_list(name: &str, default: &str) -> Vec<String> {
    env_or(name, default)
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env_or("DATABASE_URL", "sqlite://./snaplink.db");
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 5u32)?;

        let host = env_or("HOST", "127.0.0.1");
        let port = env_parse("PORT", 5000u16)?;

        let public_base_url = env_or("PUBLIC_BASE_URL", &format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();

        let cors_allowed_origins = env_list(
            "CORS_ALLOWED_ORIGINS",
            "http://localhost:5173,http://localhost:3000",
        );

        let short_code = ShortCodeConfig {
            length: env_parse("SHORT_CODE_LENGTH", 6usize)?,
            max_attempts: env_parse("SHORT_CODE_MAX_ATTEMPTS", 5usize)?,
        };
        if short_code.length == 0 || short_code.max_attempts == 0 {
            anyhow::bail!("SHORT_CODE_LENGTH and SHORT_CODE_MAX_ATTEMPTS must be positive");
        }

        let cache = CacheConfig {
            max_entries: env_parse("CACHE_MAX_ENTRIES", 10_000u64)?,
            ttl_secs: env_parse("CACHE_TTL_SECS", 300u64)?,
        };

        let purge_interval_secs = env_parse("PURGE_INTERVAL_SECS", 300u64)?;

        let trusted_proxy_mode = match env_or("TRUSTED_PROXY_MODE", "none")
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let num_trusted_proxies = match std::env::var("NUM_TRUSTED_PROXIES") {
            Ok(raw) => Some(
                raw.trim()
                    .parse::<usize>()
                    .with_context(|| format!("NUM_TRUSTED_PROXIES has an invalid value '{raw}'"))?,
            ),
            Err(_) => None,
        };

        let analytics = AnalyticsConfig {
            workers: env_parse("ANALYTICS_WORKERS", 4usize)?.max(1),
            queue_size: env_parse("ANALYTICS_QUEUE_SIZE", 10_000usize)?.max(1),
            record_retries: env_parse("ANALYTICS_RECORD_RETRIES", 3u32)?,
            lookup_timeout_ms: env_parse("ANALYTICS_LOOKUP_TIMEOUT_MS", 500u64)?,
            geoip_city_db_path: std::env::var("GEOIP_CITY_DB_PATH").ok(),
            geoip_api_url: std::env::var("GEOIP_API_URL").ok(),
            ip_anonymization: env_flag("IP_ANONYMIZATION"),
            trusted_proxy_mode,
            trusted_proxies: env_list("TRUSTED_PROXIES", ""),
            num_trusted_proxies,
        };

        let auth = AuthConfig {
            api_keys: env_list("API_KEYS", ""),
        };

        Ok(Config {
            database: DatabaseConfig {
                url: database_url,
                max_connections,
            },
            server: ServerConfig { host, port },
            public_base_url,
            cors_allowed_origins,
            short_code,
            cache,
            purge_interval_secs,
            analytics,
            auth,
        })
    }
}
