//! IP geolocation
//!
//! Lookups go through a [`GeoLocator`]: a memory-mapped MaxMind City
//! database when one is configured, otherwise an HTTP geolocation API
//! (ip-api.com response shape). [`GeoIpService`] wraps the locator with a
//! result cache and a hard timeout, and degrades to an empty location on
//! any failure so that click recording never stalls on it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use maxminddb::{geoip2, Mmap, Reader};
use moka::future::Cache;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::analytics::models::GeoLocation;
use crate::config::AnalyticsConfig;

#[async_trait]
pub trait GeoLocator: Send + Sync {
    /// Resolve `ip`; an empty [`GeoLocation`] means "no data for this address"
    async fn locate(&self, ip: IpAddr) -> Result<GeoLocation>;
}

/// MaxMind GeoLite2-City / GeoIP2-City database
pub struct MaxMindLocator {
    city_reader: Arc<Reader<Mmap>>,
}

impl MaxMindLocator {
    pub fn open(city_path: &str) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(city_path) }
            .with_context(|| format!("Failed to open GeoIP City database at {}", city_path))?;

        Ok(Self {
            city_reader: Arc::new(reader),
        })
    }

    /// Extract location from City data
    fn extract_from_city(city: &geoip2::City, geo_location: &mut GeoLocation) {
        geo_location.country_code = city.country.iso_code.map(|s| s.to_string());
        geo_location.country_name = city.country.names.english.map(|s| s.to_string());

        if let Some(subdivision) = city.subdivisions.first() {
            geo_location.region = subdivision.names.english.map(|s| s.to_string());
        }

        geo_location.city = city.city.names.english.map(|s| s.to_string());
    }

    /// Extract location from Country data (when City is not available)
    fn extract_from_country(country: &geoip2::Country, geo_location: &mut GeoLocation) {
        geo_location.country_code = country.country.iso_code.map(|s| s.to_string());
        geo_location.country_name = country.country.names.english.map(|s| s.to_string());
    }
}

#[async_trait]
impl GeoLocator for MaxMindLocator {
    async fn locate(&self, ip: IpAddr) -> Result<GeoLocation> {
        let mut geo_location = GeoLocation::default();

        let result = self
            .city_reader
            .lookup(ip)
            .with_context(|| format!("GeoIP lookup failed for {ip}"))?;

        if let Ok(Some(city)) = result.decode::<geoip2::City>() {
            Self::extract_from_city(&city, &mut geo_location);
        } else if let Ok(Some(country)) = result.decode::<geoip2::Country>() {
            // The City database is a superset of Country data
            Self::extract_from_country(&country, &mut geo_location);
        }

        Ok(geo_location)
    }
}

#[derive(Deserialize)]
struct IpApiResponse {
    status: String,
    country: Option<String>,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    #[serde(rename = "regionName")]
    region_name: Option<String>,
    city: Option<String>,
}

/// HTTP geolocation API returning the ip-api.com JSON shape.
///
/// `url_template` may contain `{ip}`; otherwise the address is appended as a
/// path segment.
pub struct HttpApiLocator {
    client: reqwest::Client,
    url_template: String,
}

impl HttpApiLocator {
    pub fn new(url_template: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build geolocation HTTP client")?;

        Ok(Self {
            client,
            url_template: url_template.to_string(),
        })
    }

    fn url_for(&self, ip: IpAddr) -> String {
        if self.url_template.contains("{ip}") {
            self.url_template.replace("{ip}", &ip.to_string())
        } else {
            format!("{}/{}", self.url_template.trim_end_matches('/'), ip)
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[async_trait]
impl GeoLocator for HttpApiLocator {
    async fn locate(&self, ip: IpAddr) -> Result<GeoLocation> {
        let body: IpApiResponse = self
            .client
            .get(self.url_for(ip))
            .send()
            .await
            .with_context(|| format!("geolocation request failed for {ip}"))?
            .json()
            .await
            .with_context(|| format!("geolocation response unreadable for {ip}"))?;

        if body.status != "success" {
            return Ok(GeoLocation::default());
        }

        Ok(GeoLocation {
            country_code: non_empty(body.country_code),
            country_name: non_empty(body.country),
            region: non_empty(body.region_name),
            city: non_empty(body.city),
        })
    }
}

/// Cached, time-bounded geolocation
pub struct GeoIpService {
    locator: Option<Arc<dyn GeoLocator>>,
    cache: Cache<IpAddr, GeoLocation>,
    timeout: Duration,
}

impl GeoIpService {
    pub fn new(locator: Option<Arc<dyn GeoLocator>>, timeout: Duration) -> Self {
        Self {
            locator,
            cache: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(Duration::from_secs(3600))
                .build(),
            timeout,
        }
    }

    /// A service that resolves every address to an empty location
    pub fn disabled() -> Self {
        Self::new(None, Duration::from_millis(1))
    }

    /// MaxMind database if configured, else HTTP API if configured, else disabled
    pub fn from_config(config: &AnalyticsConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.lookup_timeout_ms.max(1));

        let locator: Option<Arc<dyn GeoLocator>> =
            if let Some(ref path) = config.geoip_city_db_path {
                Some(Arc::new(MaxMindLocator::open(path)?))
            } else if let Some(ref url) = config.geoip_api_url {
                Some(Arc::new(HttpApiLocator::new(url, timeout)?))
            } else {
                None
            };

        Ok(Self::new(locator, timeout))
    }

    pub fn is_enabled(&self) -> bool {
        self.locator.is_some()
    }

    /// Resolve `ip`, never failing and never waiting past the timeout
    pub async fn lookup(&self, ip: IpAddr) -> GeoLocation {
        let Some(locator) = self.locator.as_ref() else {
            return GeoLocation::default();
        };

        if is_private(ip) {
            return GeoLocation::default();
        }

        if let Some(cached) = self.cache.get(&ip).await {
            return cached;
        }

        match tokio::time::timeout(self.timeout, locator.locate(ip)).await {
            Ok(Ok(location)) => {
                self.cache.insert(ip, location.clone()).await;
                location
            }
            Ok(Err(e)) => {
                debug!(%ip, error = %e, "geolocation degraded to Unknown");
                GeoLocation::default()
            }
            Err(_) => {
                debug!(%ip, timeout_ms = self.timeout.as_millis() as u64, "geolocation timed out, using Unknown");
                GeoLocation::default()
            }
        }
    }
}

/// Addresses that no geolocation source can place
fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => {
            addr.is_loopback()
                || addr.is_private()
                || addr.is_link_local()
                || addr.is_unspecified()
                || addr.is_broadcast()
        }
        IpAddr::V6(addr) => {
            if let Some(v4) = addr.to_ipv4_mapped() {
                return is_private(IpAddr::V4(v4));
            }
            addr.is_loopback()
                || addr.is_unspecified()
                // fe80::/10 link-local
                || (addr.segments()[0] & 0xffc0) == 0xfe80
                // fc00::/7 unique-local
                || (addr.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLocator {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl GeoLocator for CountingLocator {
        async fn locate(&self, _ip: IpAddr) -> Result<GeoLocation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(GeoLocation {
                country_code: Some("NL".to_string()),
                country_name: Some("Netherlands".to_string()),
                region: Some("North Holland".to_string()),
                city: Some("Amsterdam".to_string()),
            })
        }
    }

    struct FailingLocator;

    #[async_trait]
    impl GeoLocator for FailingLocator {
        async fn locate(&self, ip: IpAddr) -> Result<GeoLocation> {
            anyhow::bail!("no route to provider for {ip}")
        }
    }

    #[test]
    fn test_missing_database_fails() {
        assert!(MaxMindLocator::open("/nonexistent/path.mmdb").is_err());
    }

    #[tokio::test]
    async fn test_lookup_is_cached() {
        let locator = Arc::new(CountingLocator {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let service = GeoIpService::new(Some(locator.clone() as Arc<dyn GeoLocator>), Duration::from_secs(1));
        let ip: IpAddr = "8.8.8.8".parse().unwrap();

        assert_eq!(service.lookup(ip).await.city.as_deref(), Some("Amsterdam"));
        assert_eq!(service.lookup(ip).await.city.as_deref(), Some("Amsterdam"));
        assert_eq!(locator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_degrades_to_unknown() {
        let locator = Arc::new(CountingLocator {
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(5),
        });
        let service = GeoIpService::new(Some(locator as Arc<dyn GeoLocator>), Duration::from_millis(20));

        let started = std::time::Instant::now();
        let location = service.lookup("8.8.4.4".parse().unwrap()).await;
        assert!(location.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_failure_degrades_to_unknown() {
        let locator: Arc<dyn GeoLocator> = Arc::new(FailingLocator);
        let service = GeoIpService::new(Some(locator), Duration::from_secs(1));
        assert!(service.lookup("1.1.1.1".parse().unwrap()).await.is_empty());
    }

    #[tokio::test]
    async fn test_private_addresses_skip_lookup() {
        let locator = Arc::new(CountingLocator {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let service = GeoIpService::new(Some(locator.clone() as Arc<dyn GeoLocator>), Duration::from_secs(1));

        for ip in ["127.0.0.1", "10.1.2.3", "192.168.0.10", "::1", "fe80::1", "::ffff:10.0.0.1"] {
            assert!(service.lookup(ip.parse().unwrap()).await.is_empty());
        }
        assert_eq!(locator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_http_locator_url_template() {
        let templated =
            HttpApiLocator::new("http://ip-api.com/json/{ip}?fields=status,city", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            templated.url_for("8.8.8.8".parse().unwrap()),
            "http://ip-api.com/json/8.8.8.8?fields=status,city"
        );

        let plain = HttpApiLocator::new("http://geo.internal/lookup/", Duration::from_secs(1)).unwrap();
        assert_eq!(plain.url_for("8.8.8.8".parse().unwrap()), "http://geo.internal/lookup/8.8.8.8");
    }
}
