/*!
Test harness for the ACLK query core

Wires the mock transport, canned engine and canned metadata to a host
registry and a worker pool, and offers waits and assertions over what the
workers published.
*/

use crate::canned::{StaticMetadata, StaticQueryEngine};
use crate::mock_transport::{MockTransport, SentMessage};
use aclk_query::negotiation::ACLK_VERSION_MAX;
use aclk_query::{
    AclkQuery, Collaborators, Host, HostAclkState, HostRegistry, MetadataState, PopcornState, QueryConfig,
    SessionHeader,
};
use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct TestHarness {
    pub transport: Arc<MockTransport>,
    pub engine: Arc<StaticQueryEngine>,
    pub metadata: Arc<StaticMetadata>,
    pub hosts: Arc<HostRegistry>,
}

impl TestHarness {
    /// Harness around a primary host that is already stable and announced.
    pub fn new() -> Self {
        env_logger::try_init().ok();

        Self {
            transport: Arc::new(MockTransport::new()),
            engine: Arc::new(StaticQueryEngine::new()),
            metadata: Arc::new(StaticMetadata::new()),
            hosts: Arc::new(HostRegistry::new(Self::stable_host("parent", "guid-parent"))),
        }
    }

    pub fn stable_host(hostname: &str, machine_guid: &str) -> Arc<Host> {
        Host::with_state(
            hostname,
            machine_guid,
            HostAclkState {
                metadata: MetadataState::Sent,
                popcorn: PopcornState::Stable,
                last_popcorn_update: None,
            },
        )
    }

    pub fn localhost(&self) -> &Arc<Host> {
        self.hosts.localhost()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            transport: self.transport.clone(),
            engine: self.engine.clone(),
            metadata: self.metadata.clone(),
            header: Arc::new(SessionHeader::new(Utc::now())),
        }
    }

    /// A connected pool with the highest version agreed, not started.
    pub fn query(&self, config: QueryConfig) -> AclkQuery {
        let query = AclkQuery::new(config, self.hosts.clone(), self.collaborators());
        query.set_connected(true);
        query.set_negotiated_version(ACLK_VERSION_MAX);
        query
    }

    /// [`Self::query`] with `threads` workers running.
    pub fn start_query(&self, threads: usize) -> Result<AclkQuery> {
        let config = QueryConfig {
            query_threads: threads,
            ..QueryConfig::default()
        };
        let query = self.query(config);
        query.start(threads)?;
        Ok(query)
    }

    /// Poll until `count` messages were published on `topic`.
    pub fn wait_for_messages(&self, topic: &str, count: usize, timeout: Duration) -> Vec<SentMessage> {
        let start = Instant::now();
        loop {
            let messages = self.transport.find_by_topic(topic);
            if messages.len() >= count || start.elapsed() >= timeout {
                if messages.len() < count {
                    log::warn!("Timeout waiting for {} messages on {}, got {}", count, topic, messages.len());
                }
                return messages;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    /// Assert a dotted field of the last JSON message on `topic`.
    pub fn assert_field_equals(&self, topic: &str, field_path: &str, expected: &Value) -> Result<()> {
        let Some(msg) = self.transport.last_json(topic)? else {
            anyhow::bail!("No message on topic: {}", topic);
        };
        match get_nested_field(&msg, field_path) {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => anyhow::bail!("Field '{}' mismatch: expected {:?}, got {:?}", field_path, expected, actual),
            None => anyhow::bail!("Field '{}' not found in latest message on {}", field_path, topic),
        }
    }

    pub fn get_stats(&self) -> TestStats {
        let mut topic_counts = HashMap::new();
        let messages = self.transport.published();
        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }
        TestStats {
            total_messages: messages.len(),
            topic_counts,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, part| current.as_object()?.get(part))
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub topic_counts: HashMap<String, usize>,
}
