//! Command dispatch for popped query records.
//!
//! [`QueryExecutor::dispatch`] branches on the record's command and runs the
//! matching executor. Metadata pushes live in `meta`, cloud queries in
//! `cloud`. Every executor returns its error to the caller, which logs it and
//! drops the record.

mod cloud;
mod meta;

use serde_json::Value;
use std::sync::Arc;

use crate::error::{AclkError, Result};
use crate::host::{Host, HostRegistry};
use crate::negotiation::Negotiation;
use crate::ports::{HeaderBuilder, MetadataSource, QueryEngine, Transport};
use crate::record::{Command, QueryRecord};
use crate::stats::QueryStats;

pub use cloud::URL_API_V1;
pub use meta::{CHART_TOPIC, META_TOPIC};

/// The external services the executors talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub engine: Arc<dyn QueryEngine>,
    pub metadata: Arc<dyn MetadataSource>,
    pub header: Arc<dyn HeaderBuilder>,
}

pub struct QueryExecutor {
    transport: Arc<dyn Transport>,
    engine: Arc<dyn QueryEngine>,
    metadata: Arc<dyn MetadataSource>,
    header: Arc<dyn HeaderBuilder>,
    hosts: Arc<HostRegistry>,
    negotiation: Arc<Negotiation>,
    stats: Arc<QueryStats>,
}

impl QueryExecutor {
    pub fn new(
        collaborators: Collaborators,
        hosts: Arc<HostRegistry>,
        negotiation: Arc<Negotiation>,
        stats: Arc<QueryStats>,
    ) -> Self {
        Self {
            transport: collaborators.transport,
            engine: collaborators.engine,
            metadata: collaborators.metadata,
            header: collaborators.header,
            hosts,
            negotiation,
            stats,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn dispatch(&self, record: &QueryRecord) -> Result<()> {
        match record.command() {
            Command::OnConnect => self.on_connect(record),
            Command::Chart => self.chart(record),
            Command::ChartDelete => self.chart_delete(record),
            Command::Alarm => self.alarm(record),
            Command::CloudQueryV1 => self.cloud_query_v1(record),
            Command::CloudQueryV2 => self.cloud_query_v2(record),
            Command::ChildConnect | Command::ChildDisconnect => self.child_state(record),
        }
    }

    /// Version stamped on outgoing headers.
    fn version(&self) -> u32 {
        self.negotiation.version_or_min()
    }

    /// Publish `{header,"payload":payload}` as text.
    fn send_with_header(&self, topic: &str, kind: &str, msg_id: Option<&str>, payload: &Value) -> Result<()> {
        let header = self.header.build(kind, msg_id, self.version())?;
        let message = format!("{},\"payload\":{}}}", header, payload);
        self.transport.send(topic, &message, msg_id)
    }
}

fn required_host(record: &QueryRecord) -> Result<&Arc<Host>> {
    record.host().ok_or(AclkError::MissingHost {
        command: record.command(),
    })
}
