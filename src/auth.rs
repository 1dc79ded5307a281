use crate::error::{AppError, AppResult};
use axum::http::HeaderMap;

/// The two credentials packed into one bearer token, `<proxy>:<upstream>` or
/// just `<upstream>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositeToken {
    pub proxy: Option<String>,
    pub upstream: Option<String>,
}

pub fn split_token(raw: &str) -> CompositeToken {
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [upstream] => CompositeToken {
            proxy: None,
            upstream: Some((*upstream).to_string()),
        },
        [proxy, upstream] => CompositeToken {
            proxy: Some((*proxy).to_string()),
            upstream: Some((*upstream).to_string()),
        },
        _ => CompositeToken::default(),
    }
}

pub fn bearer_token(headers: &HeaderMap) -> String {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    raw.strip_prefix("Bearer ").unwrap_or(raw).trim().to_string()
}

/// Checks the proxy half against the configured access token and returns the
/// upstream half.
pub fn authorize(token: &CompositeToken, access_token: Option<&str>) -> AppResult<String> {
    if token.proxy.as_deref() != access_token {
        return Err(AppError::unauthorized());
    }
    match token.upstream.as_deref() {
        Some(upstream) if !upstream.is_empty() => Ok(upstream.to_string()),
        _ => Err(AppError::missing_upstream_token()),
    }
}
