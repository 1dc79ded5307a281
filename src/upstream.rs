use crate::transforms::ChatCompletionBody;
use axum::http::StatusCode;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Network(String),
    #[error("upstream status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("upstream stream read failed: {0}")]
    Read(String),
    #[error("upstream dispatch task ended abnormally: {0}")]
    Aborted(String),
}

/// Body of a successful upstream response, yielded chunk by chunk as it
/// arrives. Dropping it releases the underlying connection.
pub type UpstreamBody = BoxStream<'static, Result<Bytes, UpstreamError>>;

pub type UpstreamResult = Result<UpstreamBody, UpstreamError>;

/// Where to reach the upstream. Timeouts live on the shared client.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    pub endpoint: String,
}

/// A pending upstream call running as its own task.
///
/// Polling the handle only observes the task, so a caller can wrap it in a
/// timeout and poll it again later without disturbing the call. Dropping the
/// handle aborts the task.
pub struct DispatchHandle {
    task: JoinHandle<UpstreamResult>,
}

impl DispatchHandle {
    pub fn spawn<F>(call: F) -> Self
    where
        F: Future<Output = UpstreamResult> + Send + 'static,
    {
        Self {
            task: tokio::spawn(call),
        }
    }
}

impl Future for DispatchHandle {
    type Output = UpstreamResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(err) => Err(UpstreamError::Aborted(err.to_string())),
        })
    }
}

impl Drop for DispatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Starts the upstream call immediately and returns without waiting on it.
pub fn dispatch(
    client: &reqwest::Client,
    target: &UpstreamTarget,
    upstream_token: &str,
    body: &ChatCompletionBody,
) -> DispatchHandle {
    let request = client
        .post(&target.endpoint)
        .bearer_auth(upstream_token)
        .json(body);
    DispatchHandle::spawn(send_streaming(request))
}

async fn send_streaming(request: reqwest::RequestBuilder) -> UpstreamResult {
    let resp = request
        .send()
        .await
        .map_err(|err| UpstreamError::Network(err.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(UpstreamError::Status { status, body });
    }
    tracing::debug!(%status, "upstream accepted request");
    Ok(body_stream(resp.bytes_stream()))
}

fn body_stream<S>(stream: S) -> UpstreamBody
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    stream
        .map(|chunk| chunk.map_err(|err| UpstreamError::Read(err.to_string())))
        .boxed()
}
