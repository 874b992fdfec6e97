//! Analytics API handlers

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use super::handlers::AppState;
use crate::analytics::AnalyticsAggregate;
use crate::error::ApiError;

/// Aggregated analytics for a link id
pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AnalyticsAggregate>, ApiError> {
    match state.reader.get(&id).await? {
        Some(aggregate) => Ok(Json(aggregate)),
        None => Err(ApiError::NotFound("URL not found".to_string())),
    }
}
