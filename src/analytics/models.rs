//! Data models for analytics

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Label used whenever a classification is unavailable
pub const UNKNOWN: &str = "Unknown";

/// Referrer label for visits without a usable `Referer`
pub const DIRECT: &str = "Direct";

/// Geographic location information derived from IP address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// ISO country code (e.g., "US", "GB")
    pub country_code: Option<String>,

    /// Country name
    pub country_name: Option<String>,

    /// Region/state/province
    pub region: Option<String>,

    /// City name
    pub city: Option<String>,
}

impl GeoLocation {
    pub fn is_empty(&self) -> bool {
        self.country_code.is_none()
            && self.country_name.is_none()
            && self.region.is_none()
            && self.city.is_none()
    }

    /// Country label, preferring the full name
    pub fn country_label(&self) -> String {
        self.country_name
            .clone()
            .or_else(|| self.country_code.clone())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    pub fn region_label(&self) -> String {
        self.region.clone().unwrap_or_else(|| UNKNOWN.to_string())
    }

    pub fn city_label(&self) -> String {
        self.city.clone().unwrap_or_else(|| UNKNOWN.to_string())
    }
}

/// Browser/OS/device labels derived from a User-Agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub device: String,
    pub browser: String,
    pub operating_system: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            device: UNKNOWN.to_string(),
            browser: UNKNOWN.to_string(),
            operating_system: UNKNOWN.to_string(),
        }
    }
}

/// A granted visit as seen by the redirect handler, before classification
#[derive(Debug, Clone)]
pub struct RawClick {
    pub url_id: String,
    pub timestamp: DateTime<Utc>,
    pub client_ip: IpAddr,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

/// A classified click, ready to be committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickEvent {
    pub url_id: String,
    /// Unix milliseconds
    pub timestamp: i64,
    pub ip_address: String,
    pub country: String,
    pub state: String,
    pub city: String,
    pub device: String,
    pub browser: String,
    pub operating_system: String,
    pub referrer: Option<String>,
}

impl ClickEvent {
    /// UTC calendar day of the event, `YYYY-MM-DD`
    pub fn day(&self) -> String {
        self.datetime().format("%Y-%m-%d").to_string()
    }

    /// UTC hour of the event, 0-23
    pub fn hour(&self) -> u32 {
        self.datetime().hour()
    }

    /// Referrer bucket: the referring host, or `Direct`
    pub fn referrer_key(&self) -> String {
        referrer_key(self.referrer.as_deref())
    }

    /// (dimension, key) pairs this event increments
    pub fn dimension_keys(&self) -> [(Dimension, String); 6] {
        [
            (Dimension::Country, self.country.clone()),
            (Dimension::State, self.state.clone()),
            (Dimension::Device, self.device.clone()),
            (Dimension::Browser, self.browser.clone()),
            (Dimension::OperatingSystem, self.operating_system.clone()),
            (Dimension::Referrer, self.referrer_key()),
        ]
    }

    fn datetime(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp).unwrap_or_default()
    }
}

pub fn referrer_key(referrer: Option<&str>) -> String {
    referrer
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .and_then(|r| url::Url::parse(r).ok())
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| DIRECT.to_string())
}

/// Open-ended categorical rollups kept per link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Country,
    State,
    Device,
    Browser,
    OperatingSystem,
    Referrer,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Country,
        Dimension::State,
        Dimension::Device,
        Dimension::Browser,
        Dimension::OperatingSystem,
        Dimension::Referrer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Country => "country",
            Dimension::State => "state",
            Dimension::Device => "device",
            Dimension::Browser => "browser",
            Dimension::OperatingSystem => "os",
            Dimension::Referrer => "referrer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == s)
    }
}

/// Per-IP detail row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAddressStats {
    pub ip: String,
    pub country: String,
    pub state: String,
    pub city: String,
    pub clicks: u64,
    pub last_access: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStat {
    pub date: String,
    pub clicks: u64,
    pub unique_visitors: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyStat {
    pub hour: u32,
    pub clicks: u64,
}

/// Snapshot of everything recorded for one link
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsAggregate {
    pub clicks: u64,
    pub unique_visitors: u64,
    pub countries: BTreeMap<String, u64>,
    pub states: BTreeMap<String, u64>,
    pub devices: BTreeMap<String, u64>,
    pub browsers: BTreeMap<String, u64>,
    pub operating_systems: BTreeMap<String, u64>,
    pub referrers: BTreeMap<String, u64>,
    /// Most recent access first
    pub ip_addresses: Vec<IpAddressStats>,
    /// Ascending by date
    pub click_history: Vec<DailyStat>,
    /// Always 24 entries, hour 0 to 23
    pub hourly_stats: Vec<HourlyStat>,
    /// Ascending by date
    pub daily_stats: Vec<DailyStat>,
}

impl AnalyticsAggregate {
    /// An aggregate with no clicks and all 24 hour buckets present
    pub fn empty() -> Self {
        Self {
            hourly_stats: (0..24).map(|hour| HourlyStat { hour, clicks: 0 }).collect(),
            ..Default::default()
        }
    }

    pub fn dimension_mut(&mut self, dimension: Dimension) -> &mut BTreeMap<String, u64> {
        match dimension {
            Dimension::Country => &mut self.countries,
            Dimension::State => &mut self.states,
            Dimension::Device => &mut self.devices,
            Dimension::Browser => &mut self.browsers,
            Dimension::OperatingSystem => &mut self.operating_systems,
            Dimension::Referrer => &mut self.referrers,
        }
    }
}
