use crate::config::RuntimeConfig;
use crate::error::StartupError;
use crate::transforms::RequestTransformer;
use crate::upstream::UpstreamTarget;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeConfig>,
    /// Shared connection pool for every upstream call.
    pub http: reqwest::Client,
    pub upstream: UpstreamTarget,
    pub transformer: Arc<RequestTransformer>,
}

pub fn load_state() -> Result<AppState, StartupError> {
    load_state_with_runtime(RuntimeConfig::from_env()?)
}

pub fn load_state_with_runtime(runtime: RuntimeConfig) -> Result<AppState, StartupError> {
    // Bounds each connect and each read, not the whole exchange, so a stream
    // that keeps producing is never cut.
    let http = reqwest::Client::builder()
        .user_agent(concat!("byomproxy/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(runtime.request_timeout)
        .read_timeout(runtime.request_timeout)
        .build()?;
    let transformer = RequestTransformer::with_defaults()?;
    let upstream = UpstreamTarget {
        endpoint: runtime.upstream_endpoint.clone(),
    };
    tracing::info!(
        upstream = %upstream.endpoint,
        timeout_secs = runtime.request_timeout.as_secs(),
        access_token = runtime.access_token.is_some(),
        log_request = runtime.log_request,
        "proxy configured"
    );
    Ok(AppState {
        runtime: Arc::new(runtime),
        http,
        upstream,
        transformer: Arc::new(transformer),
    })
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/chat/completions",
            post(crate::handlers::create_chat_completions),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(SetRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
        ))
        .layer(TraceLayer::new_for_http())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
