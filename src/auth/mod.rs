use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Optional API-key gate for the management routes
pub struct AuthService {
    api_keys: Vec<String>,
}

impl AuthService {
    pub fn new(api_keys: Vec<String>) -> Self {
        Self {
            api_keys: api_keys.into_iter().filter(|k| !k.is_empty()).collect(),
        }
    }

    /// With no keys configured every request is allowed
    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    pub fn validate_key(&self, key: &str) -> bool {
        if !self.is_enabled() {
            return true;
        }

        // Check every key so the comparison time does not depend on which one matched
        self.api_keys
            .iter()
            .fold(false, |found, k| found | bool::from(k.as_bytes().ct_eq(key.as_bytes())))
    }
}

pub async fn auth_middleware(
    State(auth_service): State<Arc<AuthService>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    if auth_service.validate_key(api_key) {
        next.run(request).await
    } else {
        ApiError::Unauthorized.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_allows_everything() {
        let auth = AuthService::new(vec![]);
        assert!(!auth.is_enabled());
        assert!(auth.validate_key(""));
    }

    #[test]
    fn test_key_validation() {
        let auth = AuthService::new(vec!["alpha".to_string(), "beta".to_string()]);
        assert!(auth.validate_key("beta"));
        assert!(!auth.validate_key("gamma"));
        assert!(!auth.validate_key(""));
        assert!(!auth.validate_key("alph"));
    }
}
