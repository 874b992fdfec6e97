use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use super::format_millis;

/// A stored short link. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UrlRecord {
    pub id: String,
    pub code: String,
    pub original_url: String,
    pub password_hash: Option<String>,
    pub expiration: String,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub custom_alias: bool,
    pub click_count: i64,
}

impl UrlRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now.timestamp_millis())
    }

    pub fn is_password_protected(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// Row to insert; `code` is filled in per allocation attempt.
#[derive(Debug, Clone)]
pub struct NewUrl {
    pub id: String,
    pub code: String,
    pub original_url: String,
    pub password_hash: Option<String>,
    pub expiration: Expiration,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub custom_alias: bool,
}

/// Symbolic lifetime of a link, measured from creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Expiration {
    #[default]
    #[serde(rename = "never")]
    Never,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
}

impl Expiration {
    pub fn as_str(&self) -> &'static str {
        match self {
            Expiration::Never => "never",
            Expiration::FiveMinutes => "5m",
            Expiration::OneHour => "1h",
            Expiration::OneDay => "1d",
            Expiration::SevenDays => "7d",
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Expiration::Never => None,
            Expiration::FiveMinutes => Some(Duration::minutes(5)),
            Expiration::OneHour => Some(Duration::hours(1)),
            Expiration::OneDay => Some(Duration::days(1)),
            Expiration::SevenDays => Some(Duration::days(7)),
        }
    }

    /// Absolute expiry for a link created at `created_at`
    pub fn expires_at(&self, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.duration().map(|d| created_at + d)
    }
}

impl fmt::Display for Expiration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Expiration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "never" => Ok(Expiration::Never),
            "5m" => Ok(Expiration::FiveMinutes),
            "1h" => Ok(Expiration::OneHour),
            "1d" => Ok(Expiration::OneDay),
            "7d" => Ok(Expiration::SevenDays),
            other => Err(format!(
                "unsupported expiration '{other}' (expected one of never, 5m, 1h, 1d, 7d)"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUrlRequest {
    pub url: String,
    #[serde(default)]
    pub custom_alias: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub expiration: Option<String>,
}

/// Public view of a link; never carries the password hash
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UrlResponse {
    pub id: String,
    pub code: String,
    pub original_url: String,
    pub short_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_alias: Option<String>,
    pub expiration: String,
    pub expires_at: Option<String>,
    pub created_at: String,
    pub clicks: i64,
    pub password_protected: bool,
}

impl UrlResponse {
    pub fn from_record(record: &UrlRecord, public_base_url: &str) -> Self {
        Self {
            id: record.id.clone(),
            code: record.code.clone(),
            original_url: record.original_url.clone(),
            short_url: format!("{}/{}", public_base_url.trim_end_matches('/'), record.code),
            custom_alias: record.custom_alias.then(|| record.code.clone()),
            expiration: record.expiration.clone(),
            expires_at: record.expires_at.map(format_millis),
            created_at: format_millis(record.created_at),
            clicks: record.click_count,
            password_protected: record.is_password_protected(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(expires_at: Option<i64>) -> UrlRecord {
        UrlRecord {
            id: "id-1".to_string(),
            code: "abc123".to_string(),
            original_url: "https://example.com".to_string(),
            password_hash: Some("$argon2id$secret".to_string()),
            expiration: "5m".to_string(),
            expires_at,
            created_at: 0,
            custom_alias: false,
            click_count: 3,
        }
    }

    #[test]
    fn test_expiration_parse() {
        assert_eq!("never".parse::<Expiration>().unwrap(), Expiration::Never);
        assert_eq!("5m".parse::<Expiration>().unwrap(), Expiration::FiveMinutes);
        assert_eq!("7d".parse::<Expiration>().unwrap(), Expiration::SevenDays);
        assert!("2w".parse::<Expiration>().is_err());
    }

    #[test]
    fn test_expires_at_measured_from_creation() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(Expiration::Never.expires_at(created), None);
        assert_eq!(
            Expiration::OneHour.expires_at(created),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_is_expired_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ms = now.timestamp_millis();
        assert!(record(Some(ms)).is_expired_at(now));
        assert!(!record(Some(ms + 1)).is_expired_at(now));
        assert!(!record(None).is_expired_at(now));
    }

    #[test]
    fn test_response_hides_password_hash() {
        let response = UrlResponse::from_record(&record(None), "http://localhost:5000/");
        assert_eq!(response.short_url, "http://localhost:5000/abc123");
        assert!(response.password_protected);

        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("customAlias"));
    }
}
