/*!
In-memory ACLK transport

Records every published message so tests can assert on what the workers
sent, and optionally hands each one to a channel for blocking waits.
*/

use aclk_query::{AclkError, Transport};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub msg_id: Option<String>,
    pub binary: bool,
    pub at: DateTime<Utc>,
}

impl SentMessage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Transport double that never touches the network.
#[derive(Default)]
pub struct MockTransport {
    published: Mutex<Vec<SentMessage>>,
    rx_versions: Mutex<Vec<u32>>,
    listener: Mutex<Option<mpsc::Sender<SentMessage>>>,
    failing: AtomicBool,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel receiving a copy of every message published from now on.
    pub fn setup_receiver(&self) -> mpsc::Receiver<SentMessage> {
        let (sender, receiver) = mpsc::channel();
        *locked(&self.listener) = Some(sender);
        receiver
    }

    /// Make every subsequent publish fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<SentMessage> {
        locked(&self.published).clone()
    }

    pub fn find_by_topic(&self, topic: &str) -> Vec<SentMessage> {
        locked(&self.published)
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse the last text message on `topic` as JSON.
    pub fn last_json(&self, topic: &str) -> Result<Option<Value>> {
        match self.find_by_topic(topic).last() {
            Some(msg) => Ok(Some(msg.json()?)),
            None => Ok(None),
        }
    }

    /// Versions passed to [`Transport::configure_rx`], in call order.
    pub fn rx_versions(&self) -> Vec<u32> {
        locked(&self.rx_versions).clone()
    }

    pub fn clear(&self) {
        locked(&self.published).clear();
        locked(&self.rx_versions).clear();
    }

    fn record(&self, topic: &str, payload: &[u8], msg_id: Option<&str>, binary: bool) -> aclk_query::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AclkError::Transport(format!("mock publish to {} refused", topic)));
        }

        let message = SentMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            msg_id: msg_id.map(str::to_string),
            binary,
            at: Utc::now(),
        };
        log::info!("[MOCK] Published to {}: {} bytes", message.topic, message.payload.len());

        if let Some(sender) = locked(&self.listener).as_ref() {
            sender.send(message.clone()).ok();
        }
        locked(&self.published).push(message);
        Ok(())
    }
}

impl Transport for MockTransport {
    fn send(&self, topic: &str, payload: &str, msg_id: Option<&str>) -> aclk_query::Result<()> {
        self.record(topic, payload.as_bytes(), msg_id, false)
    }

    fn send_binary(&self, topic: &str, payload: &[u8], msg_id: Option<&str>) -> aclk_query::Result<()> {
        self.record(topic, payload, msg_id, true)
    }

    fn configure_rx(&self, version: u32) {
        locked(&self.rx_versions).push(version);
    }
}
