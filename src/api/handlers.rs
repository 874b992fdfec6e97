use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::analytics::AnalyticsReader;
use crate::error::ApiError;
use crate::models::{CreateUrlRequest, UrlResponse};
use crate::registry::UrlRegistry;

pub struct AppState {
    pub registry: Arc<UrlRegistry>,
    pub reader: AnalyticsReader,
    pub public_base_url: String,
}

impl AppState {
    fn view(&self, record: &crate::models::UrlRecord) -> UrlResponse {
        UrlResponse::from_record(record, &self.public_base_url)
    }
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Create a new short link
pub async fn create_url(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateUrlRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UrlResponse>), ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    let record = state.registry.create(payload).await?;
    Ok((StatusCode::CREATED, Json(state.view(&record))))
}

/// List all short links, most recent first
pub async fn list_urls(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UrlResponse>>, ApiError> {
    let records = state.registry.list().await?;
    Ok(Json(records.iter().map(|r| state.view(r)).collect()))
}

/// Get a short link by id
pub async fn get_url(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UrlResponse>, ApiError> {
    let record = state.registry.get_by_id(&id).await?;
    Ok(Json(state.view(&record)))
}

/// Hard delete a short link and its analytics
pub async fn delete_url(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.registry.delete(&id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "OK" })
}
