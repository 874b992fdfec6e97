//! Management API integration tests

mod common;

use axum::http::StatusCode;
use common::{create_link, spawn_app, spawn_app_with, memory_storage, test_config, TestRequest};
use serde_json::{json, Value};
use snaplink::analytics::GeoIpService;
use snaplink::codegen::CodeGenerator;

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;

    let (status, body) = TestRequest::get("/api/health").send(app.router()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "OK" }));
}

#[tokio::test]
async fn test_create_returns_public_record() {
    let app = spawn_app().await;

    let body = create_link(
        app.router(),
        json!({ "url": "https://example.com/a", "password": "secret", "expiration": "1h" }),
    )
    .await;

    let code = body["code"].as_str().unwrap();
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_eq!(body["originalUrl"], "https://example.com/a");
    assert_eq!(body["shortUrl"], format!("http://sho.rt/{code}"));
    assert_eq!(body["expiration"], "1h");
    assert_eq!(body["createdAt"], "2024-03-10T14:30:00.000Z");
    assert_eq!(body["expiresAt"], "2024-03-10T15:30:00.000Z");
    assert_eq!(body["clicks"], 0);
    assert_eq!(body["passwordProtected"], true);
    assert!(body.get("customAlias").is_none());
    assert!(body.get("passwordHash").is_none());
    assert!(!body.to_string().contains("argon2"));
}

#[tokio::test]
async fn test_create_with_never_expiration() {
    let app = spawn_app().await;

    let body = create_link(app.router(), json!({ "url": "https://example.com", "expiration": "never" })).await;

    assert_eq!(body["expiresAt"], Value::Null);
    assert_eq!(body["passwordProtected"], false);
}

#[tokio::test]
async fn test_create_validation_errors() {
    let app = spawn_app().await;

    let cases = [
        json!({}),
        json!({ "url": 5 }),
        json!({ "url": "https://example.com", "expiration": 7 }),
        json!({ "url": "" }),
        json!({ "url": "not a url" }),
        json!({ "url": "ftp://example.com/file" }),
        json!({ "url": "https://example.com", "expiration": "2w" }),
        json!({ "url": "https://example.com", "customAlias": "a b" }),
        json!({ "url": "https://example.com", "customAlias": "ab" }),
        json!({ "url": "https://example.com", "customAlias": "api" }),
    ];

    for case in cases {
        let (status, body) = TestRequest::post("/api/shorten", case.clone())
            .send(app.router())
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "case {case}");
        assert!(body["error"].is_string(), "case {case}");
    }
}

#[tokio::test]
async fn test_malformed_json_body_is_validation_error() {
    let app = spawn_app().await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/shorten")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();

    let response = tower::ServiceExt::oneshot(app.router(), request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_duplicate_alias_conflicts() {
    let app = spawn_app().await;

    let first = create_link(
        app.router(),
        json!({ "url": "https://example.com/one", "customAlias": "launch" }),
    )
    .await;
    assert_eq!(first["code"], "launch");
    assert_eq!(first["customAlias"], "launch");

    let (status, body) = TestRequest::post(
        "/api/shorten",
        json!({ "url": "https://example.com/two", "customAlias": "launch" }),
    )
    .send(app.router())
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("launch"));
}

#[tokio::test]
async fn test_concurrent_alias_creation() {
    let app = spawn_app().await;

    let mut handles = vec![];
    for i in 0..10 {
        let router = app.router();
        handles.push(tokio::spawn(async move {
            TestRequest::post(
                "/api/shorten",
                json!({ "url": format!("https://example.com/{i}"), "customAlias": "contested" }),
            )
            .send(router)
            .await
            .0
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::CREATED => created += 1,
            StatusCode::CONFLICT => conflicts += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(created, 1, "exactly one creation should succeed");
    assert_eq!(conflicts, 9);
}

#[tokio::test]
async fn test_list_is_most_recent_first() {
    let app = spawn_app().await;

    for i in 0..3 {
        create_link(app.router(), json!({ "url": format!("https://example.com/{i}") })).await;
        app.clock.advance(chrono::Duration::seconds(1));
    }

    let (status, body) = TestRequest::get("/api/urls").send(app.router()).await;
    assert_eq!(status, StatusCode::OK);

    let urls: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["originalUrl"].as_str().unwrap())
        .collect();
    assert_eq!(
        urls,
        ["https://example.com/2", "https://example.com/1", "https://example.com/0"]
    );
}

#[tokio::test]
async fn test_get_by_id() {
    let app = spawn_app().await;
    let created = create_link(app.router(), json!({ "url": "https://example.com" })).await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = TestRequest::get(format!("/api/urls/{id}")).send(app.router()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, created);

    let (status, _) = TestRequest::get("/api/urls/missing").send(app.router()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_is_immediate() {
    let app = spawn_app().await;
    let created = create_link(app.router(), json!({ "url": "https://example.com" })).await;
    let id = created["id"].as_str().unwrap();
    let code = created["code"].as_str().unwrap();

    // Warm the lookup cache first
    let (status, _) = TestRequest::get(format!("/{code}")).send(app.router()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = TestRequest::delete(format!("/api/urls/{id}")).send(app.router()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let (status, _) = TestRequest::get(format!("/{code}")).send(app.router()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = TestRequest::delete(format!("/api/urls/{id}")).send(app.router()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = TestRequest::get(format!("/api/analytics/{id}")).send(app.router()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_analytics_for_fresh_link() {
    let app = spawn_app().await;
    let created = create_link(app.router(), json!({ "url": "https://example.com" })).await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = TestRequest::get(format!("/api/analytics/{id}")).send(app.router()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clicks"], 0);
    assert_eq!(body["uniqueVisitors"], 0);
    assert_eq!(body["hourlyStats"].as_array().unwrap().len(), 24);
    assert!(body["clickHistory"].as_array().unwrap().is_empty());
    assert!(body["ipAddresses"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_generator_exhaustion_is_503() {
    // A one-character alphabet of length one has a single possible code
    let app = spawn_app_with(
        memory_storage().await,
        GeoIpService::disabled(),
        CodeGenerator::with_alphabet("z", 1, 5),
        test_config(),
    )
    .await;

    let first = create_link(app.router(), json!({ "url": "https://example.com/1" })).await;
    assert_eq!(first["code"], "z");

    let (status, body) = TestRequest::post("/api/shorten", json!({ "url": "https://example.com/2" }))
        .send(app.router())
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let mut config = test_config();
    config.auth.api_keys = vec!["let-me-in".to_string()];
    let app = spawn_app_with(
        memory_storage().await,
        GeoIpService::disabled(),
        CodeGenerator::new(6, 5),
        config,
    )
    .await;

    let (status, _) = TestRequest::get("/api/urls").send(app.router()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = TestRequest::get("/api/urls")
        .header("x-api-key", "wrong")
        .send(app.router())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = TestRequest::post("/api/shorten", json!({ "url": "https://example.com" }))
        .header("x-api-key", "let-me-in")
        .send(app.router())
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Health and redirects stay public
    let (status, _) = TestRequest::get("/api/health").send(app.router()).await;
    assert_eq!(status, StatusCode::OK);

    let code = body["code"].as_str().unwrap();
    let (status, _) = TestRequest::get(format!("/{code}")).send(app.router()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_cors_preflight_allows_configured_origin() {
    let app = spawn_app().await;

    let request = axum::http::Request::builder()
        .method("OPTIONS")
        .uri("/api/shorten")
        .header("origin", "http://localhost:5173")
        .header("access-control-request-method", "POST")
        .body(axum::body::Body::empty())
        .unwrap();

    let response = tower::ServiceExt::oneshot(app.router(), request).await.unwrap();

    let headers = response.headers();
    assert_eq!(
        headers.get("access-control-allow-origin").unwrap(),
        "http://localhost:5173"
    );
    assert_eq!(
        headers.get("access-control-allow-credentials").unwrap(),
        "true"
    );
}
