//! Synthetic SSE frames the proxy writes on its own behalf.

use bytes::Bytes;
use serde_json::{Value, json};

/// SSE comment line; clients and intermediaries ignore it.
pub const HEARTBEAT: &[u8] = b": keep-alive\n\n";

pub const DONE: &[u8] = b"data: [DONE]\n\n";

pub fn heartbeat() -> Bytes {
    Bytes::from_static(HEARTBEAT)
}

/// Builds completion chunks that share one id, timestamp and model, so the
/// frames of a single relay look like one completion to the client.
#[derive(Debug, Clone)]
pub struct FrameForge {
    id: String,
    created: i64,
    model: String,
}

impl FrameForge {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
        }
    }

    pub fn content_chunk(&self, text: &str) -> Bytes {
        data_frame(&self.chunk(json!({ "content": text }), Value::Null))
    }

    /// Empty delta with `finish_reason: "stop"`, then `[DONE]`.
    pub fn terminator(&self) -> Bytes {
        let mut out = data_frame(&self.chunk(json!({}), json!("stop"))).to_vec();
        out.extend_from_slice(DONE);
        Bytes::from(out)
    }

    fn chunk(&self, delta: Value, finish_reason: Value) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        })
    }
}

fn data_frame(payload: &Value) -> Bytes {
    Bytes::from(format!("data: {payload}\n\n"))
}
