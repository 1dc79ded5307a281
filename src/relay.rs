use crate::sse::{self, FrameForge};
use crate::upstream::{DispatchHandle, UpstreamBody, UpstreamError};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;

/// Shown to the client in place of upstream error details, which stay in the logs.
pub const UPSTREAM_FAILURE_MESSAGE: &str =
    "The proxy failed to get a response from the upstream API. Check the proxy logs for details.";

const DONE_MARKER: &[u8] = b"data: [DONE]";

enum RelayState {
    Start(DispatchHandle),
    Waiting(DispatchHandle),
    Forwarding(UpstreamBody),
    Failed(UpstreamError),
    Terminating,
    Ended,
}

/// Drives the client-facing body of one streaming completion.
///
/// The first frame is always a heartbeat. While the upstream has not answered,
/// another heartbeat goes out every `wait_budget`. A successful upstream
/// response is then copied through byte for byte; a failed one is replaced by
/// a single error chunk and a terminator.
pub struct StreamRelay {
    state: RelayState,
    wait_budget: Duration,
    forge: FrameForge,
    /// Set once the upstream's own `[DONE]` has been forwarded.
    upstream_done: bool,
    /// Bytes of the marker matched so far on the current line; `None` once the
    /// line has diverged from it.
    marker_progress: Option<usize>,
}

impl StreamRelay {
    pub fn new(handle: DispatchHandle, wait_budget: Duration, forge: FrameForge) -> Self {
        Self {
            state: RelayState::Start(handle),
            wait_budget,
            forge,
            upstream_done: false,
            marker_progress: Some(0),
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures_util::stream::unfold(self, StreamRelay::step).map(Ok)
    }

    async fn step(mut self) -> Option<(Bytes, Self)> {
        loop {
            match std::mem::replace(&mut self.state, RelayState::Ended) {
                RelayState::Start(handle) => {
                    tracing::debug!("relay started, waiting on upstream");
                    self.state = RelayState::Waiting(handle);
                    return Some((sse::heartbeat(), self));
                }
                RelayState::Waiting(mut handle) => {
                    match tokio::time::timeout(self.wait_budget, &mut handle).await {
                        Err(_) => {
                            tracing::trace!("upstream still pending, sending heartbeat");
                            self.state = RelayState::Waiting(handle);
                            return Some((sse::heartbeat(), self));
                        }
                        Ok(Ok(body)) => {
                            tracing::debug!("upstream responded, forwarding stream");
                            self.state = RelayState::Forwarding(body);
                        }
                        Ok(Err(err)) => self.state = RelayState::Failed(err),
                    }
                }
                RelayState::Forwarding(mut body) => match body.next().await {
                    Some(Ok(chunk)) => {
                        self.scan_for_done(&chunk);
                        self.state = RelayState::Forwarding(body);
                        if !chunk.is_empty() {
                            return Some((chunk, self));
                        }
                    }
                    Some(Err(err)) if self.upstream_done => {
                        tracing::warn!(error = %err, "upstream stream failed after [DONE]");
                        drop(body);
                        return None;
                    }
                    Some(Err(err)) => {
                        drop(body);
                        self.state = RelayState::Failed(err);
                    }
                    None => {
                        tracing::debug!("upstream stream finished");
                        drop(body);
                        return None;
                    }
                },
                RelayState::Failed(err) => {
                    tracing::error!(error = %err, "upstream failed, terminating stream");
                    self.state = RelayState::Terminating;
                    return Some((self.forge.content_chunk(UPSTREAM_FAILURE_MESSAGE), self));
                }
                RelayState::Terminating => {
                    self.state = RelayState::Ended;
                    return Some((self.forge.terminator(), self));
                }
                RelayState::Ended => return None,
            }
        }
    }

    // Only a marker at the start of a line counts, so `data: [DONE]` quoted
    // inside a content string is ignored. Progress carries across chunks.
    fn scan_for_done(&mut self, chunk: &[u8]) {
        if self.upstream_done {
            return;
        }
        for &byte in chunk {
            self.marker_progress = match self.marker_progress {
                Some(matched) if DONE_MARKER[matched] == byte => {
                    if matched + 1 == DONE_MARKER.len() {
                        self.upstream_done = true;
                        return;
                    }
                    Some(matched + 1)
                }
                _ if byte == b'\n' => Some(0),
                _ => None,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamResult;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn chunk(s: &'static str) -> Result<&'static [u8], UpstreamError> {
        Ok(s.as_bytes())
    }

    fn body_of(chunks: Vec<Result<&'static [u8], UpstreamError>>) -> UpstreamBody {
        futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|c| c.map(Bytes::from_static))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    async fn collect(relay: StreamRelay) -> Vec<Bytes> {
        relay
            .into_stream()
            .map(|item| match item {
                Ok(bytes) => bytes,
                Err(never) => match never {},
            })
            .collect()
            .await
    }

    fn relay_for(result: UpstreamResult, budget: Duration) -> StreamRelay {
        StreamRelay::new(
            DispatchHandle::spawn(async move { result }),
            budget,
            FrameForge::new("gpt-5"),
        )
    }

    fn count_done(frames: &[Bytes]) -> usize {
        frames
            .iter()
            .map(|f| String::from_utf8_lossy(f).matches("data: [DONE]").count())
            .sum()
    }

    #[tokio::test]
    async fn success_is_heartbeat_then_verbatim_passthrough() {
        let upstream = body_of(vec![
            chunk("data: {\"a\":1}\n\n"),
            chunk("data: {\"b\":2}\n\n"),
            chunk("data: [DONE]\n\n"),
        ]);
        let frames = collect(relay_for(Ok(upstream), Duration::from_secs(5))).await;
        assert_eq!(&frames[0][..], sse::HEARTBEAT);
        let rest: Vec<u8> = frames[1..].iter().flat_map(|f| f.to_vec()).collect();
        assert_eq!(
            rest,
            b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\ndata: [DONE]\n\n".to_vec()
        );
        assert_eq!(count_done(&frames), 1);
    }

    #[tokio::test]
    async fn stalled_upstream_gets_extra_heartbeats() {
        let handle = DispatchHandle::spawn(async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            Ok(body_of(vec![chunk("data: [DONE]\n\n")]))
        });
        let relay = StreamRelay::new(handle, Duration::from_millis(20), FrameForge::new("o3"));
        let frames = collect(relay).await;

        let heartbeats = frames
            .iter()
            .take_while(|f| &f[..] == sse::HEARTBEAT)
            .count();
        assert!(heartbeats >= 2, "only {heartbeats} heartbeats");
        assert_eq!(frames.len(), heartbeats + 1);
        assert_eq!(&frames[heartbeats][..], b"data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn upstream_status_failure_forges_error_and_terminator() {
        let err = UpstreamError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "secret upstream detail".to_string(),
        };
        let frames = collect(relay_for(Err(err), Duration::from_secs(5))).await;
        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0][..], sse::HEARTBEAT);
        let content = String::from_utf8_lossy(&frames[1]);
        assert!(content.contains(UPSTREAM_FAILURE_MESSAGE));
        assert!(!content.contains("secret upstream detail"));
        let terminator = String::from_utf8_lossy(&frames[2]);
        assert!(terminator.contains("\"finish_reason\":\"stop\""));
        assert!(terminator.ends_with("data: [DONE]\n\n"));
        assert_eq!(count_done(&frames), 1);
    }

    #[tokio::test]
    async fn read_error_mid_stream_forges_error_after_forwarded_bytes() {
        let upstream = body_of(vec![
            chunk("data: {\"a\":1}\n\n"),
            Err(UpstreamError::Read("connection reset".to_string())),
            chunk("data: never\n\n"),
        ]);
        let frames = collect(relay_for(Ok(upstream), Duration::from_secs(5))).await;
        assert_eq!(frames.len(), 4);
        assert_eq!(&frames[1][..], b"data: {\"a\":1}\n\n");
        assert!(String::from_utf8_lossy(&frames[2]).contains(UPSTREAM_FAILURE_MESSAGE));
        assert_eq!(count_done(&frames), 1);
    }

    #[tokio::test]
    async fn read_error_after_upstream_done_adds_nothing() {
        let upstream = body_of(vec![
            chunk("data: {\"a\":1}\n\ndata: [DO"),
            chunk("NE]\n\n"),
            Err(UpstreamError::Read("connection reset".to_string())),
        ]);
        let frames = collect(relay_for(Ok(upstream), Duration::from_secs(5))).await;
        assert_eq!(frames.len(), 3);
        assert!(
            frames
                .iter()
                .all(|f| !String::from_utf8_lossy(f).contains(UPSTREAM_FAILURE_MESSAGE))
        );
        let all: Vec<u8> = frames.iter().flat_map(|f| f.to_vec()).collect();
        assert!(all.ends_with(b"data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn quoted_done_marker_does_not_end_the_stream() {
        let upstream = body_of(vec![
            chunk("data: {\"choices\":[{\"delta\":{\"content\":\"print('data: [DONE]')\"}}]}\n\n"),
            Err(UpstreamError::Read("connection reset".to_string())),
        ]);
        let frames = collect(relay_for(Ok(upstream), Duration::from_secs(5))).await;
        assert_eq!(frames.len(), 4);
        assert!(String::from_utf8_lossy(&frames[2]).contains(UPSTREAM_FAILURE_MESSAGE));
        let terminator = String::from_utf8_lossy(&frames[3]);
        assert!(terminator.contains("\"finish_reason\":\"stop\""));
        assert!(terminator.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn done_marker_must_start_a_line() {
        let mut relay = relay_for(
            Err(UpstreamError::Aborted("unused".to_string())),
            Duration::from_secs(5),
        );
        relay.scan_for_done(b"data: {\"x\":\"data: [DONE]\"}\n\n");
        assert!(!relay.upstream_done);
        relay.scan_for_done(b"data: [DO");
        assert!(!relay.upstream_done);
        relay.scan_for_done(b"NE]\n\n");
        assert!(relay.upstream_done);
    }

    #[tokio::test]
    async fn dropping_relay_while_forwarding_releases_upstream_body() {
        struct SetOnDrop(Arc<AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let released = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(released.clone());
        let first = futures_util::stream::iter(vec![chunk("data: {\"a\":1}\n\n")])
            .map(|c| c.map(Bytes::from_static));
        let upstream = first
            .chain(futures_util::stream::unfold(guard, |guard| async move {
                std::future::pending::<()>().await;
                Some((Ok(Bytes::new()), guard))
            }))
            .boxed();
        let mut stream = Box::pin(relay_for(Ok(upstream), Duration::from_secs(5)).into_stream());
        assert!(matches!(stream.next().await, Some(Ok(_))));
        let forwarded = stream.next().await;
        assert!(matches!(forwarded, Some(Ok(ref b)) if &b[..] == b"data: {\"a\":1}\n\n"));
        assert!(!released.load(Ordering::SeqCst));

        drop(stream);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropping_relay_aborts_pending_dispatch() {
        struct SetOnDrop(Arc<AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let released = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(released.clone());
        let handle = DispatchHandle::spawn(async move {
            let _guard = guard;
            std::future::pending::<UpstreamResult>().await
        });
        let mut stream = Box::pin(
            StreamRelay::new(handle, Duration::from_millis(10), FrameForge::new("")).into_stream(),
        );
        assert!(matches!(stream.next().await, Some(Ok(_))));
        assert!(matches!(stream.next().await, Some(Ok(_))));
        drop(stream);

        for _ in 0..100 {
            if released.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(released.load(Ordering::SeqCst));
    }
}
