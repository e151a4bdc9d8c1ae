//! MQTT transport for the query workers
//!
//! Workers run on plain threads, so publishing goes through
//! `AsyncClient::try_publish`, which only hands the packet to the event loop.

use aclk_query::{AclkError, Transport};
use rumqttc::{AsyncClient, QoS};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info};

pub struct MqttTransport {
    client: AsyncClient,
    prefix: String,
    /// 0 until the protocol version is known.
    rx_version: AtomicU32,
}

impl MqttTransport {
    pub fn new(client: AsyncClient, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into().trim_end_matches('/').to_string(),
            rx_version: AtomicU32::new(0),
        }
    }

    /// Topics without a `/` are relative to the outbound prefix.
    pub fn full_topic(&self, topic: &str) -> String {
        if topic.contains('/') || self.prefix.is_empty() {
            topic.to_string()
        } else {
            format!("{}/{}", self.prefix, topic)
        }
    }

    pub fn rx_version(&self) -> Option<u32> {
        match self.rx_version.load(Ordering::Acquire) {
            0 => None,
            version => Some(version),
        }
    }

    fn publish(&self, topic: &str, payload: Vec<u8>, msg_id: Option<&str>) -> aclk_query::Result<()> {
        let topic = self.full_topic(topic);
        debug!("Publishing {} bytes to {} (msg-id {:?})", payload.len(), topic, msg_id);
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| AclkError::Transport(e.to_string()))
    }
}

impl Transport for MqttTransport {
    fn send(&self, topic: &str, payload: &str, msg_id: Option<&str>) -> aclk_query::Result<()> {
        self.publish(topic, payload.as_bytes().to_vec(), msg_id)
    }

    fn send_binary(&self, topic: &str, payload: &[u8], msg_id: Option<&str>) -> aclk_query::Result<()> {
        self.publish(topic, payload.to_vec(), msg_id)
    }

    fn configure_rx(&self, version: u32) {
        info!("Inbound handlers configured for ACLK version {}", version);
        self.rx_version.store(version, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::MqttOptions;

    fn transport() -> (MqttTransport, rumqttc::EventLoop) {
        let options = MqttOptions::new("aclk-agent-test", "127.0.0.1", 1883);
        let (client, eventloop) = AsyncClient::new(options, 10);
        (MqttTransport::new(client, "aclk/outbound/"), eventloop)
    }

    #[test]
    fn test_full_topic() {
        let (transport, _eventloop) = transport();
        assert_eq!(transport.full_topic("meta"), "aclk/outbound/meta");
        assert_eq!(transport.full_topic("cloud/resp/1"), "cloud/resp/1");
    }

    #[test]
    fn test_rx_version() {
        let (transport, _eventloop) = transport();
        assert_eq!(transport.rx_version(), None);
        transport.configure_rx(3);
        assert_eq!(transport.rx_version(), Some(3));
    }

    #[test]
    fn test_send_without_event_loop_fails() {
        let (transport, eventloop) = transport();
        drop(eventloop);
        let err = transport.send_binary("chart", b"\x00\x01", Some("id-1")).unwrap_err();
        assert!(matches!(err, AclkError::Transport(_)));
    }
}
