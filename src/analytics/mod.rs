//! Click analytics
//!
//! Granted visits enter [`ClickEventPipeline`], which classifies them
//! (User-Agent, geolocation) and folds them into per-link rollups. The
//! rollups are read back through [`AnalyticsReader`].

pub mod geoip;
pub mod ip_extractor;
pub mod models;
pub mod pipeline;
pub mod reader;
pub mod user_agent;

pub use geoip::{GeoIpService, GeoLocator};
pub use ip_extractor::ClientIpExtractor;
pub use models::{AnalyticsAggregate, ClickEvent, GeoLocation, RawClick};
pub use pipeline::ClickEventPipeline;
pub use reader::AnalyticsReader;
