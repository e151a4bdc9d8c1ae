//! Inbound cloud messages
//!
//! Text messages are JSON objects with a `type` field. Binary cloud queries
//! (allowed from ACLK_V_COMPRESSION on) are a JSON header, a blank line and
//! the raw HTTP request head.

use aclk_query::negotiation::ACLK_V_COMPRESSION;
use aclk_query::{AclkQuery, CloudRequest, EnqueueOutcome, Host, QueryRequest};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

const SEPARATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Error)]
pub enum RxError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message has no {0}")]
    MissingField(&'static str),
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("binary messages need ACLK version {required}, link is at {negotiated:?}")]
    BinaryNotAllowed { required: u32, negotiated: Option<u32> },
    #[error("malformed HTTP request head: {0}")]
    MalformedRequest(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    version: Option<u32>,
    #[serde(rename = "msg-id")]
    msg_id: Option<String>,
    #[serde(rename = "callback-topic")]
    callback_topic: Option<String>,
    payload: Option<String>,
}

impl Envelope {
    fn routing(&mut self) -> Result<(String, String), RxError> {
        let topic = self.callback_topic.take().ok_or(RxError::MissingField("callback-topic"))?;
        let msg_id = self.msg_id.take().ok_or(RxError::MissingField("msg-id"))?;
        Ok((topic, msg_id))
    }
}

#[derive(Debug)]
pub enum Inbound {
    /// The version the cloud offers.
    Version(u32),
    Query(QueryRequest),
}

pub fn parse(payload: &[u8], rx_version: Option<u32>, localhost: &Arc<Host>) -> Result<Inbound, RxError> {
    if let Some(split) = payload.windows(SEPARATOR.len()).position(|w| w == SEPARATOR) {
        return parse_binary(&payload[..split], &payload[split + SEPARATOR.len()..], rx_version, localhost);
    }

    let mut envelope: Envelope = serde_json::from_slice(payload)?;
    match envelope.kind.as_str() {
        "version" => envelope.version.map(Inbound::Version).ok_or(RxError::MissingField("version")),
        "http" => {
            let (topic, msg_id) = envelope.routing()?;
            let query = envelope.payload.take().ok_or(RxError::MissingField("payload"))?;
            Ok(Inbound::Query(QueryRequest::cloud_query(topic, msg_id, query)))
        }
        other => Err(RxError::UnknownType(other.to_string())),
    }
}

fn parse_binary(
    header: &[u8],
    head: &[u8],
    rx_version: Option<u32>,
    localhost: &Arc<Host>,
) -> Result<Inbound, RxError> {
    if !rx_version.is_some_and(|v| v >= ACLK_V_COMPRESSION) {
        return Err(RxError::BinaryNotAllowed {
            required: ACLK_V_COMPRESSION,
            negotiated: rx_version,
        });
    }

    let mut envelope: Envelope = serde_json::from_slice(header)?;
    if envelope.kind != "http" {
        return Err(RxError::UnknownType(envelope.kind));
    }
    let (topic, msg_id) = envelope.routing()?;

    let head = String::from_utf8_lossy(head).into_owned();
    let request_line = head.lines().next().unwrap_or_default();
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    let path = match parts.as_slice() {
        [_method, path, _version] => path.to_string(),
        _ => return Err(RxError::MalformedRequest(request_line.to_string())),
    };

    let request = CloudRequest::new(path, head, localhost.clone());
    Ok(Inbound::Query(QueryRequest::cloud_query_v2(topic, msg_id, request)))
}

/// Parse one message from the inbound topic and act on it. Bad messages are
/// logged and dropped.
pub fn handle(payload: &[u8], rx_version: Option<u32>, query: &AclkQuery) {
    let inbound = match parse(payload, rx_version, query.hosts().localhost()) {
        Ok(inbound) => inbound,
        Err(e) => {
            error!("Dropping inbound message: {}", e);
            return;
        }
    };

    match inbound {
        Inbound::Version(offered) => match query.set_negotiated_version(offered) {
            Some(version) => debug!("Cloud offered version {}, using {}", offered, version),
            None => warn!("Version {} received after negotiation ended, ignored", offered),
        },
        Inbound::Query(request) => {
            let command = request.command();
            match query.enqueue(request) {
                EnqueueOutcome::NotConnected => warn!("{} dropped, link not connected", command),
                outcome => debug!("{} enqueue: {:?}", command, outcome),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aclk_devkit::{AclkMessageBuilder, TestHarness};
    use aclk_query::{ApiResponse, Command, QueryConfig, Tick};

    fn localhost() -> Arc<Host> {
        Host::new("parent", "guid-parent")
    }

    #[test]
    fn test_parse_version() {
        let message = AclkMessageBuilder::version(3).to_string();
        match parse(message.as_bytes(), None, &localhost()).unwrap() {
            Inbound::Version(version) => assert_eq!(version, 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_http_v1() {
        let message = AclkMessageBuilder::http_v1("id-1", "resp/1", "/api/v1/info").to_string();
        match parse(message.as_bytes(), Some(2), &localhost()).unwrap() {
            Inbound::Query(request) => assert_eq!(request.command(), Command::CloudQueryV1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_messages() {
        let host = localhost();
        assert!(matches!(parse(b"not json", None, &host), Err(RxError::Json(_))));
        assert!(matches!(
            parse(br#"{"type":"pong"}"#, None, &host),
            Err(RxError::UnknownType(kind)) if kind == "pong"
        ));
        assert!(matches!(
            parse(br#"{"type":"http","msg-id":"id-1","payload":"/api/v1/info"}"#, None, &host),
            Err(RxError::MissingField("callback-topic"))
        ));
    }

    #[test]
    fn test_binary_needs_compression_version() {
        let message = AclkMessageBuilder::http_v2("id-1", "resp/1", "/api/v1/info", &[]);
        assert!(matches!(
            parse(&message, None, &localhost()),
            Err(RxError::BinaryNotAllowed { negotiated: None, .. })
        ));
        match parse(&message, Some(ACLK_V_COMPRESSION), &localhost()).unwrap() {
            Inbound::Query(request) => assert_eq!(request.command(), Command::CloudQueryV2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_binary_malformed_head() {
        let mut message = br#"{"type":"http","msg-id":"id-1","callback-topic":"resp/1"}"#.to_vec();
        message.extend_from_slice(b"\r\n\r\nGARBAGE\r\n\r\n");
        assert!(matches!(
            parse(&message, Some(3), &localhost()),
            Err(RxError::MalformedRequest(line)) if line == "GARBAGE"
        ));
    }

    #[test]
    fn test_handle_negotiates_and_queues() {
        let harness = TestHarness::new();
        harness.engine.respond("info", ApiResponse::new(200, "{}"));
        let query = AclkQuery::new(QueryConfig::default(), harness.hosts.clone(), harness.collaborators());
        query.set_connected(true);

        handle(AclkMessageBuilder::version(7).to_string().as_bytes(), None, &query);
        assert_eq!(query.negotiation().version(), Some(3));

        let message = AclkMessageBuilder::http_v2(
            "id-2",
            "resp/2",
            "/api/v1/info?after=-60",
            &[("Accept-Encoding", "gzip")],
        );
        handle(&message, Some(3), &query);
        assert_eq!(query.queue_size(), 1);
        assert_eq!(query.run_once(0), Tick::Drained(1));

        let calls = harness.engine.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].endpoint, "info");
        assert_eq!(calls[0].query_string, "after=-60");
        assert_eq!(harness.transport.find_by_topic("resp/2").len(), 1);
    }

    #[test]
    fn test_handle_drops_garbage() {
        let harness = TestHarness::new();
        let query = harness.query(QueryConfig::default());
        handle(b"{\"type\":", Some(3), &query);
        assert_eq!(query.queue_size(), 0);
    }
}
