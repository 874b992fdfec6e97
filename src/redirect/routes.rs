use axum::{routing::get, Router};
use std::sync::Arc;

use super::handlers::{resolve_code, unlock_code, RedirectState};

pub fn create_redirect_router(state: Arc<RedirectState>) -> Router {
    Router::new()
        .route("/{code}", get(resolve_code).post(unlock_code))
        .with_state(state)
}
