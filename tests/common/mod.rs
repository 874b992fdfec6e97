//! Shared helpers for the integration tests

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use snaplink::analytics::GeoIpService;
use snaplink::clock::ManualClock;
use snaplink::codegen::CodeGenerator;
use snaplink::config::{Config, TrustedProxyMode};
use snaplink::storage::{CachedStorage, SqliteStorage, Storage};
use snaplink::App;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

pub const PEER_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 40000);

pub struct TestApp {
    pub app: App,
    pub storage: Arc<dyn Storage>,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn router(&self) -> Router {
        self.app
            .router
            .clone()
            .layer(MockConnectInfo(SocketAddr::from(PEER_ADDR)))
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 14, 30, 0).unwrap()
}

/// Config for tests: visitor IPs come from `X-Forwarded-For`
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.public_base_url = "http://sho.rt".to_string();
    config.analytics.trusted_proxy_mode = TrustedProxyMode::Standard;
    config.analytics.workers = 2;
    config
}

pub async fn memory_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(CachedStorage::new(Arc::new(storage), 1000, 300))
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(
        memory_storage().await,
        GeoIpService::disabled(),
        CodeGenerator::new(6, 5),
        test_config(),
    )
    .await
}

pub async fn spawn_app_with(
    storage: Arc<dyn Storage>,
    geoip: GeoIpService,
    generator: CodeGenerator,
    config: Config,
) -> TestApp {
    let clock = Arc::new(ManualClock::new(start_time()));
    let app = App::build(
        Arc::clone(&storage),
        Arc::new(geoip),
        clock.clone(),
        generator,
        &config,
    );

    TestApp {
        app,
        storage,
        clock,
    }
}

pub struct TestRequest {
    method: &'static str,
    uri: String,
    body: Option<Value>,
    headers: Vec<(&'static str, String)>,
}

impl TestRequest {
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new("GET", uri)
    }

    pub fn post(uri: impl Into<String>, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new("POST", uri)
        }
    }

    pub fn delete(uri: impl Into<String>) -> Self {
        Self::new("DELETE", uri)
    }

    fn new(method: &'static str, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            body: None,
            headers: vec![],
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn from_ip(self, ip: &str) -> Self {
        self.header("x-forwarded-for", ip)
    }

    pub async fn send(self, router: Router) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(self.method).uri(&self.uri);
        for (name, value) in &self.headers {
            builder = builder.header(*name, value.as_str());
        }

        let request = match self.body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, body)
    }
}

/// Create a link through the API and return its JSON record
pub async fn create_link(router: Router, body: Value) -> Value {
    let (status, json) = TestRequest::post("/api/shorten", body).send(router).await;
    assert_eq!(status, StatusCode::CREATED, "unexpected body: {json}");
    json
}
