//! Interfaces to the collaborators around the query core.
//!
//! The transport publishes messages toward the cloud, the query engine
//! answers `/api/v1/...` requests, the metadata source describes hosts and
//! charts, and the header builder opens every outbound message. The core
//! only ever talks to them through these traits.

use serde_json::Value;

use crate::error::Result;
use crate::host::Host;

/// Outbound side of the cloud link.
pub trait Transport: Send + Sync {
    /// Publish a text message. Text payloads are UTF-8; binary bodies go
    /// through `send_binary`.
    fn send(&self, topic: &str, payload: &str, msg_id: Option<&str>) -> Result<()>;

    /// Publish a binary message of exactly `payload.len()` bytes.
    fn send_binary(&self, topic: &str, payload: &[u8], msg_id: Option<&str>) -> Result<()>;

    /// Called once the protocol version is known, so inbound handlers can
    /// switch to what that version allows.
    fn configure_rx(&self, _version: u32) {}
}

/// Response of the internal API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiResponse {
    pub code: u16,
    pub body: Vec<u8>,
    /// HTTP header block, each line CRLF terminated. Must not carry
    /// `Content-Length`; the binary framing adds it after compression.
    pub headers: Vec<u8>,
}

impl ApiResponse {
    pub fn new(code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            body: body.into(),
            headers: Vec::new(),
        }
    }

    pub fn json(code: u16, body: &Value) -> Self {
        Self {
            code,
            body: body.to_string().into_bytes(),
            headers: b"Content-Type: application/json\r\n".to_vec(),
        }
    }

    pub fn not_found(endpoint: &str) -> Self {
        Self {
            code: 404,
            body: format!("Unsupported API endpoint: {}", endpoint).into_bytes(),
            headers: b"Content-Type: text/plain\r\n".to_vec(),
        }
    }
}

/// The internal `/api/v1/` query engine.
pub trait QueryEngine: Send + Sync {
    fn execute(&self, host: &Host, endpoint: &str, query_string: &str) -> ApiResponse;
}

/// Host and chart descriptions for metadata messages.
pub trait MetadataSource: Send + Sync {
    fn host_info(&self, host: &Host) -> Value;

    fn charts(&self, host: &Host) -> Value;

    fn chart(&self, host: &Host, chart_id: &str) -> Option<Value>;
}

/// Opens an outbound JSON message.
pub trait HeaderBuilder: Send + Sync {
    /// Return a JSON object with its closing brace left off; callers append
    /// their own fields and close it.
    fn build(&self, kind: &str, msg_id: Option<&str>, version: u32) -> Result<String>;
}
