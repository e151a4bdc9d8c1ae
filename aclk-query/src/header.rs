//! Default ACLK message header.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::ports::HeaderBuilder;

#[derive(Debug, Serialize)]
struct Header<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(rename = "msg-id")]
    msg_id: &'a str,
    timestamp: i64,
    #[serde(rename = "timestamp-offset-usec")]
    timestamp_offset_usec: u32,
    connect: i64,
    #[serde(rename = "connect-offset-usec")]
    connect_offset_usec: u32,
    version: u32,
}

/// Header stamped with the time the link session was established.
#[derive(Debug, Clone)]
pub struct SessionHeader {
    connected_at: DateTime<Utc>,
}

impl SessionHeader {
    pub fn new(connected_at: DateTime<Utc>) -> Self {
        Self { connected_at }
    }
}

impl HeaderBuilder for SessionHeader {
    fn build(&self, kind: &str, msg_id: Option<&str>, version: u32) -> Result<String> {
        // Messages we originate get a fresh id
        let generated;
        let msg_id = match msg_id {
            Some(id) => id,
            None => {
                generated = Uuid::new_v4().to_string();
                &generated
            }
        };

        let now = Utc::now();
        let header = Header {
            kind,
            msg_id,
            timestamp: now.timestamp(),
            timestamp_offset_usec: now.timestamp_subsec_micros(),
            connect: self.connected_at.timestamp(),
            connect_offset_usec: self.connected_at.timestamp_subsec_micros(),
            version,
        };

        let mut json = serde_json::to_string(&header)?;
        json.pop();
        Ok(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_open_object() {
        let header = SessionHeader::new(Utc::now()).build("http", Some("abc"), 3).unwrap();
        assert!(!header.ends_with('}'));

        let closed: serde_json::Value = serde_json::from_str(&format!("{}}}", header)).unwrap();
        assert_eq!(closed["type"], "http");
        assert_eq!(closed["msg-id"], "abc");
        assert_eq!(closed["version"], 3);
        assert!(closed["connect"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_missing_msg_id_gets_uuid() {
        let header = SessionHeader::new(Utc::now()).build("connect", None, 2).unwrap();
        let closed: serde_json::Value = serde_json::from_str(&format!("{}}}", header)).unwrap();
        let id = closed["msg-id"].as_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
