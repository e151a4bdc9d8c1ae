/*!
Cloud message helpers

Builders for what the cloud sends to the agent, and a parser for the binary
responses the agent sends back.
*/

use anyhow::{Context, Result};
use serde_json::{json, Value};

const SEPARATOR: &[u8] = b"\r\n\r\n";

/// Builds inbound messages in the shapes the agent's rx side accepts.
pub struct AclkMessageBuilder;

impl AclkMessageBuilder {
    pub fn version(version: u32) -> Value {
        json!({
            "type": "version",
            "version": version,
        })
    }

    pub fn http_v1(msg_id: &str, callback_topic: &str, query: &str) -> Value {
        json!({
            "type": "http",
            "msg-id": msg_id,
            "callback-topic": callback_topic,
            "payload": query,
        })
    }

    /// Binary v2 request: JSON header, blank line, raw HTTP request head.
    pub fn http_v2(msg_id: &str, callback_topic: &str, path: &str, headers: &[(&str, &str)]) -> Vec<u8> {
        let header = json!({
            "type": "http",
            "msg-id": msg_id,
            "callback-topic": callback_topic,
        });
        let mut message = header.to_string().into_bytes();
        message.extend_from_slice(SEPARATOR);
        message.extend_from_slice(Self::request_head(path, headers).as_bytes());
        message
    }

    pub fn request_head(path: &str, headers: &[(&str, &str)]) -> String {
        let mut head = format!("GET {} HTTP/1.1\r\n", path);
        for (name, value) in headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("\r\n");
        head
    }
}

/// A v2 cloud query response split into its three parts.
#[derive(Debug, Clone)]
pub struct BinaryResponse {
    /// The JSON header, closed.
    pub header: Value,
    /// HTTP header lines without the terminating blank line.
    pub headers: String,
    pub body: Vec<u8>,
}

impl BinaryResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let split = find(payload, SEPARATOR).context("no JSON header separator")?;
        let header: Value = serde_json::from_slice(&payload[..split]).context("bad JSON header")?;

        let rest = &payload[split + SEPARATOR.len()..];
        let end = find(rest, SEPARATOR).context("no end of HTTP headers")?;
        let headers = String::from_utf8_lossy(&rest[..end + 2]).into_owned();
        let body = rest[end + SEPARATOR.len()..].to_vec();

        Ok(Self { header, headers, body })
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.split("\r\n").find_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key.trim() == name).then(|| value.trim())
        })
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header_value("Content-Length")?.parse().ok()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binary_response() {
        let mut payload = br#"{"type":"http","http-code":200}"#.to_vec();
        payload.extend_from_slice(b"\r\n\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello");

        let response = BinaryResponse::parse(&payload).unwrap();
        assert_eq!(response.header["http-code"], 200);
        assert_eq!(response.header_value("Content-Type"), Some("text/plain"));
        assert_eq!(response.content_length(), Some(5));
        assert_eq!(response.body, b"hello");
    }

    #[test]
    fn test_v2_request_layout() {
        let message = AclkMessageBuilder::http_v2("id-1", "resp", "/api/v1/info", &[("Accept-Encoding", "gzip")]);
        let text = String::from_utf8(message).unwrap();
        let (header, head) = text.split_once("\r\n\r\n").unwrap();
        assert_eq!(serde_json::from_str::<Value>(header).unwrap()["msg-id"], "id-1");
        assert!(head.starts_with("GET /api/v1/info HTTP/1.1\r\nAccept-Encoding: gzip\r\n"));
    }
}
