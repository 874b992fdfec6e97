pub mod url;

pub use url::{CreateUrlRequest, Expiration, NewUrl, UrlRecord, UrlResponse};

use chrono::{DateTime, SecondsFormat, Utc};

/// Render a stored Unix-millisecond timestamp as RFC 3339
pub fn format_millis(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
