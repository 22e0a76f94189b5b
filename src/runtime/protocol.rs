// src/runtime/protocol.rs
//! Wire protocol between the host and a worker process
//!
//! One JSON document per line over the worker's stdin/stdout. A worker's whole
//! conversation is:
//!
//! ```text
//! worker → host   {"type":"ready","limits":{...}}
//! host   → worker {"type":"render","template":"...","context":{...}}   (or ping)
//! worker → host   {"type":"rendered","output":"..."}                     (or render_failed / pong)
//! ```
//!
//! after which the worker exits.

use crate::runtime::resource_limiter::ResourceLimits;
use crate::utils::errors::{Result, SandboxError};
use serde::{Deserialize, Serialize};

/// Template context: string keys to arbitrary JSON values
pub type Context = serde_json::Map<String, serde_json::Value>;

/// An immutable (template, context) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub template: String,
    pub context: Context,
}

impl RenderRequest {
    pub fn new(template: impl Into<String>, context: Context) -> Self {
        Self {
            template: template.into(),
            context,
        }
    }
}

/// Host → worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    Render(RenderRequest),
    /// Liveness probe; does no template work
    Ping,
}

/// Worker → host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    /// Limits are in force and the worker is waiting for its one task
    Ready { limits: ResourceLimits },
    Rendered { output: String },
    RenderFailed { message: String },
    Pong,
}

/// Encode a message as a single line, newline included
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

/// Decode one line received from the other side
pub fn decode_line<'a, T: Deserialize<'a>>(line: &'a str) -> Result<T> {
    serde_json::from_str(line.trim_end())
        .map_err(|e| SandboxError::Protocol(format!("malformed message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_tagging() {
        let mut context = Context::new();
        context.insert("greeting".into(), json!("Hello"));
        let request = WorkerRequest::Render(RenderRequest::new("{{ greeting }}", context));

        let line = encode_line(&request).unwrap();
        assert_eq!(*line.last().unwrap(), b'\n');

        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["type"], "render");
        assert_eq!(value["template"], "{{ greeting }}");
        assert_eq!(value["context"]["greeting"], "Hello");

        let ping: serde_json::Value =
            serde_json::from_slice(&encode_line(&WorkerRequest::Ping).unwrap()).unwrap();
        assert_eq!(ping, json!({"type": "ping"}));
    }

    #[test]
    fn test_reply_with_embedded_newlines_stays_on_one_line() {
        let reply = WorkerReply::Rendered {
            output: "line one\nline two\n".into(),
        };
        let line = encode_line(&reply).unwrap();
        let text = std::str::from_utf8(&line).unwrap();
        assert_eq!(text.matches('\n').count(), 1);

        let decoded: WorkerReply = decode_line(text).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn test_malformed_line_is_protocol_error() {
        let result: Result<WorkerReply> = decode_line("not json\n");
        assert!(matches!(result, Err(SandboxError::Protocol(_))));
    }
}
