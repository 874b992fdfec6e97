use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use super::resolver::{RedirectResolver, Resolution, Visitor};
use crate::analytics::ClientIpExtractor;
use crate::error::ApiError;

pub struct RedirectState {
    pub resolver: RedirectResolver,
    pub ip_extractor: ClientIpExtractor,
}

#[derive(Debug, Default, Deserialize)]
pub struct PasswordRequest {
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RedirectBody {
    redirect_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequiredBody {
    requires_password: bool,
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}

fn visitor(state: &RedirectState, headers: &HeaderMap, addr: SocketAddr) -> Visitor {
    Visitor {
        ip: state.ip_extractor.extract(headers, addr.ip()),
        user_agent: header_value(headers, header::USER_AGENT),
        referrer: header_value(headers, header::REFERER),
    }
}

fn respond(resolution: Resolution) -> Response {
    match resolution {
        Resolution::Redirect(redirect_url) => {
            (StatusCode::OK, Json(RedirectBody { redirect_url })).into_response()
        }
        Resolution::PasswordRequired => (
            StatusCode::OK,
            Json(PasswordRequiredBody {
                requires_password: true,
            }),
        )
            .into_response(),
        Resolution::NotFoundOrExpired => ApiError::link_not_found().into_response(),
        Resolution::WrongPassword => ApiError::WrongPassword.into_response(),
    }
}

/// Probe a short code without a password
pub async fn resolve_code(
    State(state): State<Arc<RedirectState>>,
    Path(code): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let visitor = visitor(&state, &headers, addr);
    let resolution = state.resolver.resolve(&code, None, visitor).await?;
    Ok(respond(resolution))
}

/// Resolve a protected short code with the visitor's password
pub async fn unlock_code(
    State(state): State<Arc<RedirectState>>,
    Path(code): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    // Missing or malformed bodies count as an empty password
    let password = serde_json::from_slice::<PasswordRequest>(&body)
        .unwrap_or_default()
        .password
        .filter(|p| !p.is_empty());

    let resolution = match password {
        Some(password) => {
            let visitor = visitor(&state, &headers, addr);
            state.resolver.resolve(&code, Some(password), visitor).await?
        }
        // An empty submission is a wrong password unless the link is open
        None => {
            let visitor = visitor(&state, &headers, addr);
            match state.resolver.resolve(&code, None, visitor).await? {
                Resolution::PasswordRequired => Resolution::WrongPassword,
                other => other,
            }
        }
    };

    Ok(respond(resolution))
}
