use crate::app::AppState;
use crate::auth;
use crate::error::{AppError, AppResult};
use crate::relay::StreamRelay;
use crate::sse::FrameForge;
use crate::transforms::{ChatCompletionBody, CompletionParams};
use crate::upstream;
use axum::body::{Body, Bytes};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use std::collections::BTreeMap;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

pub async fn create_chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<CompletionParams>, QueryRejection>,
    raw_body: Bytes,
) -> AppResult<Response> {
    let token = auth::split_token(&auth::bearer_token(&headers));
    let upstream_token = auth::authorize(&token, state.runtime.access_token.as_deref())?;
    let Query(params) = params.map_err(|err| AppError::invalid_params(err.body_text()))?;
    let body = state.transformer.transform(&raw_body, &params)?;

    if state.runtime.log_request {
        log_request(&headers, &body);
    }

    let forge = FrameForge::new(body.model().unwrap_or_default());
    let handle = upstream::dispatch(&state.http, &state.upstream, &upstream_token, &body);
    let relay = StreamRelay::new(handle, state.runtime.heartbeat_interval, forge);

    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
            (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (X_ACCEL_BUFFERING, HeaderValue::from_static("no")),
        ],
        Body::from_stream(relay.into_stream()),
    )
        .into_response())
}

fn log_request(headers: &HeaderMap, body: &ChatCompletionBody) {
    let headers: BTreeMap<&str, &str> = headers
        .iter()
        .map(|(name, value)| {
            let value = if name == AUTHORIZATION {
                "<redacted>"
            } else {
                value.to_str().unwrap_or("<binary>")
            };
            (name.as_str(), value)
        })
        .collect();
    let body = serde_json::to_string(body).unwrap_or_default();
    tracing::info!(?headers, %body, "chat completion request");
}
