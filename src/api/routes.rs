use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::auth::{auth_middleware, AuthService};

use super::analytics::get_analytics;
use super::handlers::{create_url, delete_url, get_url, health_check, list_urls, AppState};

pub fn create_api_router(state: Arc<AppState>, auth_service: Arc<AuthService>) -> Router {
    let protected_routes = Router::new()
        .route("/shorten", post(create_url))
        .route("/urls", get(list_urls))
        .route("/urls/{id}", get(get_url).delete(delete_url))
        .route("/analytics/{id}", get(get_analytics))
        .route_layer(middleware::from_fn_with_state(auth_service, auth_middleware))
        .with_state(state);

    let api = Router::new()
        .route("/health", get(health_check))
        .merge(protected_routes);

    Router::new().nest("/api", api)
}
