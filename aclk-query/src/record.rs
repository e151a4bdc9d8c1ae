//! Query records: one unit of work waiting in the ACLK queue.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::host::Host;

/// What a queued query asks the workers to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    OnConnect,
    Chart,
    ChartDelete,
    Alarm,
    CloudQueryV1,
    CloudQueryV2,
    ChildConnect,
    ChildDisconnect,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::OnConnect => "on_connect",
            Command::Chart => "chart",
            Command::ChartDelete => "chart_delete",
            Command::Alarm => "alarm",
            Command::CloudQueryV1 => "cloud_query",
            Command::CloudQueryV2 => "cloud_query_v2",
            Command::ChildConnect => "child_connect",
            Command::ChildDisconnect => "child_disconnect",
        }
    }

    /// Commands that cannot run without a host reference.
    pub fn needs_host(&self) -> bool {
        matches!(
            self,
            Command::OnConnect
                | Command::Chart
                | Command::ChartDelete
                | Command::ChildConnect
                | Command::ChildDisconnect
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cloud query v2 request as received from the cloud.
#[derive(Debug)]
pub struct CloudRequest {
    pub id: Uuid,
    /// Request path as sent by the cloud, e.g. `/api/v1/data`.
    pub endpoint: String,
    /// Raw HTTP request head (request line + headers).
    pub data: String,
    /// Host the query targets.
    pub host: Arc<Host>,
}

impl CloudRequest {
    pub fn new(endpoint: impl Into<String>, data: impl Into<String>, host: Arc<Host>) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint: endpoint.into(),
            data: data.into(),
            host,
        }
    }
}

/// Optional payload attached to a record.
#[derive(Debug)]
pub enum QueryPayload {
    Host(Arc<Host>),
    CloudRequest(Box<CloudRequest>),
}

impl QueryPayload {
    /// Identity comparison, as used by queue deduplication.
    pub fn same_as(&self, other: &QueryPayload) -> bool {
        match (self, other) {
            (QueryPayload::Host(a), QueryPayload::Host(b)) => Arc::ptr_eq(a, b),
            (QueryPayload::CloudRequest(a), QueryPayload::CloudRequest(b)) => a.id == b.id,
            _ => false,
        }
    }
}

/// Input to [`crate::QueryQueue::enqueue`].
///
/// Strings given as `&str` are copied, `String`s are moved in, so internal
/// callers keep their buffers and the transport hands over what it parsed.
#[derive(Debug)]
pub struct QueryRequest {
    pub(crate) command: Command,
    pub(crate) topic: String,
    pub(crate) payload: Option<QueryPayload>,
    pub(crate) msg_id: Option<String>,
    pub(crate) query: Option<String>,
    pub(crate) delay_secs: u32,
}

impl QueryRequest {
    pub fn new(command: Command, topic: impl Into<String>) -> Self {
        Self {
            command,
            topic: topic.into(),
            payload: None,
            msg_id: None,
            query: None,
            delay_secs: 0,
        }
    }

    /// The metadata push queued by the worker loop for `host`.
    pub fn on_connect(host: Arc<Host>) -> Self {
        Self::new(Command::OnConnect, "on_connect").with_host(host)
    }

    pub fn chart(host: Arc<Host>, chart_id: impl Into<String>) -> Self {
        Self::new(Command::Chart, "chart")
            .with_host(host)
            .with_query(chart_id)
    }

    pub fn chart_delete(host: Arc<Host>, chart_id: impl Into<String>) -> Self {
        Self::new(Command::ChartDelete, "chart")
            .with_host(host)
            .with_query(chart_id)
    }

    pub fn alarm(topic: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Command::Alarm, topic).with_query(body)
    }

    pub fn child_connect(host: Arc<Host>) -> Self {
        Self::new(Command::ChildConnect, "child_connect").with_host(host)
    }

    pub fn child_disconnect(host: Arc<Host>) -> Self {
        Self::new(Command::ChildDisconnect, "child_disconnect").with_host(host)
    }

    /// A text cloud query; the strings come straight from the parsed message.
    pub fn cloud_query(topic: String, msg_id: String, query: String) -> Self {
        Self::new(Command::CloudQueryV1, topic)
            .with_msg_id(msg_id)
            .with_query(query)
    }

    pub fn cloud_query_v2(topic: String, msg_id: String, request: CloudRequest) -> Self {
        let query = request.endpoint.clone();
        Self {
            command: Command::CloudQueryV2,
            topic,
            payload: Some(QueryPayload::CloudRequest(Box::new(request))),
            msg_id: Some(msg_id),
            query: Some(query),
            delay_secs: 0,
        }
    }

    pub fn with_host(mut self, host: Arc<Host>) -> Self {
        self.payload = Some(QueryPayload::Host(host));
        self
    }

    pub fn with_msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.msg_id = Some(msg_id.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Run no earlier than `secs` seconds from now.
    pub fn delayed(mut self, secs: u32) -> Self {
        self.delay_secs = secs;
        self
    }

    pub fn command(&self) -> Command {
        self.command
    }
}

/// A queued query. Owned by the queue until popped, then by one worker.
#[derive(Debug)]
pub struct QueryRecord {
    pub(crate) created: DateTime<Utc>,
    pub(crate) created_mono: Instant,
    pub(crate) run_after: i64,
    pub(crate) command: Command,
    pub(crate) topic: String,
    pub(crate) payload: Option<QueryPayload>,
    pub(crate) msg_id: Option<String>,
    pub(crate) query: Option<String>,
    pub(crate) deleted: bool,
    pub(crate) idx: Option<usize>,
}

impl QueryRecord {
    pub(crate) fn from_request(request: QueryRequest, now: i64) -> Self {
        Self {
            created: Utc::now(),
            created_mono: Instant::now(),
            run_after: now + i64::from(request.delay_secs),
            command: request.command,
            topic: request.topic,
            payload: request.payload,
            msg_id: request.msg_id,
            query: request.query,
            deleted: false,
            idx: None,
        }
    }

    /// Same dedup key: command, topic, payload identity, msg-id and query text.
    pub(crate) fn matches(&self, request: &QueryRequest) -> bool {
        if self.command != request.command
            || self.topic != request.topic
            || self.query != request.query
            || self.msg_id != request.msg_id
        {
            return false;
        }
        match (&self.payload, &request.payload) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_as(b),
            _ => false,
        }
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn created_mono(&self) -> Instant {
        self.created_mono
    }

    /// Earliest execution time, epoch seconds.
    pub fn run_after(&self) -> i64 {
        self.run_after
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> Option<&QueryPayload> {
        self.payload.as_ref()
    }

    /// Host reference for host-scoped commands.
    pub fn host(&self) -> Option<&Arc<Host>> {
        match &self.payload {
            Some(QueryPayload::Host(host)) => Some(host),
            _ => None,
        }
    }

    pub fn cloud_request(&self) -> Option<&CloudRequest> {
        match &self.payload {
            Some(QueryPayload::CloudRequest(request)) => Some(request),
            _ => None,
        }
    }

    pub fn msg_id(&self) -> Option<&str> {
        self.msg_id.as_deref()
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Worker index, stamped at pop time.
    pub fn idx(&self) -> Option<usize> {
        self.idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_copies_or_adopts_strings() {
        let topic = String::from("alarm/1");
        let request = QueryRequest::alarm(topic.as_str(), "alarm text");
        assert_eq!(topic, "alarm/1");
        assert_eq!(request.topic, "alarm/1");

        let adopted = QueryRequest::cloud_query("cb".into(), "id-1".into(), "/api/v1/info".into());
        assert_eq!(adopted.msg_id.as_deref(), Some("id-1"));
        assert_eq!(adopted.command(), Command::CloudQueryV1);
    }

    #[test]
    fn test_match_uses_host_identity() {
        let a = Host::new("a", "guid-a");
        let b = Host::new("a", "guid-a");
        let record = QueryRecord::from_request(QueryRequest::chart(a.clone(), "system.cpu"), 0);

        assert!(record.matches(&QueryRequest::chart(a, "system.cpu")));
        assert!(!record.matches(&QueryRequest::chart(b, "system.cpu")));
    }

    #[test]
    fn test_run_after_adds_delay() {
        let record = QueryRecord::from_request(QueryRequest::alarm("t", "q").delayed(5), 100);
        assert_eq!(record.run_after(), 105);
        assert!(record.idx().is_none());
        assert!(!record.is_deleted());
    }

    #[test]
    fn test_host_commands() {
        assert!(Command::OnConnect.needs_host());
        assert!(Command::ChildDisconnect.needs_host());
        assert!(!Command::Alarm.needs_host());
        assert!(!Command::CloudQueryV1.needs_host());
    }
}
