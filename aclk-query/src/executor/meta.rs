use serde_json::{json, Value};
use tracing::debug;

use super::{required_host, QueryExecutor};
use crate::error::{AclkError, Result};
use crate::host::MetadataState;
use crate::negotiation::ACLK_V_CHILDRENSTATE;
use crate::record::{Command, QueryRecord};

pub const META_TOPIC: &str = "meta";
pub const CHART_TOPIC: &str = "chart";

impl QueryExecutor {
    pub(super) fn on_connect(&self, record: &QueryRecord) -> Result<()> {
        let host = required_host(record)?;

        let version = self.version();
        if version < ACLK_V_CHILDRENSTATE && !self.hosts.is_localhost(host) {
            return Err(AclkError::VersionTooLow {
                command: Command::OnConnect,
                required: ACLK_V_CHILDRENSTATE,
                negotiated: version,
            });
        }

        // Lock released before talking to the metadata source
        let prior = host.take_metadata_for_send();
        let kind = if prior == MetadataState::Sent {
            "update"
        } else {
            "connect"
        };
        debug!("Sending {} metadata for host \"{}\"", kind, host.hostname());

        let payload = json!({
            "info": self.metadata.host_info(host),
            "charts": self.metadata.charts(host),
        });
        self.send_with_header(META_TOPIC, kind, record.msg_id(), &payload)
    }

    pub(super) fn chart(&self, record: &QueryRecord) -> Result<()> {
        let host = required_host(record)?;
        let chart_id = record.query().unwrap_or_default();
        let chart = self
            .metadata
            .chart(host, chart_id)
            .ok_or_else(|| AclkError::UnknownChart(chart_id.to_string()))?;
        self.send_with_header(CHART_TOPIC, "chart", record.msg_id(), &chart)
    }

    pub(super) fn chart_delete(&self, record: &QueryRecord) -> Result<()> {
        let host = required_host(record)?;
        let payload = json!({
            "id": record.query().unwrap_or_default(),
            "node-id": host.machine_guid(),
        });
        self.send_with_header(CHART_TOPIC, "chart-delete", record.msg_id(), &payload)
    }

    pub(super) fn alarm(&self, record: &QueryRecord) -> Result<()> {
        self.transport
            .send(record.topic(), record.query().unwrap_or_default(), record.msg_id())
    }

    pub(super) fn child_state(&self, record: &QueryRecord) -> Result<()> {
        let host = required_host(record)?;
        let payload = json!({
            "guid": host.machine_guid(),
            "hostname": host.hostname(),
            "claim_id": Value::Null,
        });
        self.send_with_header(META_TOPIC, record.command().as_str(), record.msg_id(), &payload)
    }
}
