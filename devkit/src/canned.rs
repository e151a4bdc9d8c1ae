/*!
Canned query engine and metadata source
*/

use aclk_query::{ApiResponse, Host, MetadataSource, QueryEngine};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One call seen by [`StaticQueryEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCall {
    pub hostname: String,
    pub endpoint: String,
    pub query_string: String,
}

/// Answers from a fixed endpoint table, 404 for anything else.
#[derive(Default)]
pub struct StaticQueryEngine {
    responses: Mutex<HashMap<String, ApiResponse>>,
    calls: Mutex<Vec<EngineCall>>,
}

impl StaticQueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, endpoint: &str, response: ApiResponse) -> &Self {
        locked(&self.responses).insert(endpoint.to_string(), response);
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        locked(&self.calls).clone()
    }
}

impl QueryEngine for StaticQueryEngine {
    fn execute(&self, host: &Host, endpoint: &str, query_string: &str) -> ApiResponse {
        locked(&self.calls).push(EngineCall {
            hostname: host.hostname().to_string(),
            endpoint: endpoint.to_string(),
            query_string: query_string.to_string(),
        });
        locked(&self.responses)
            .get(endpoint)
            .cloned()
            .unwrap_or_else(|| ApiResponse::not_found(endpoint))
    }
}

/// Metadata built from hostname and guid, plus registered charts.
#[derive(Default)]
pub struct StaticMetadata {
    charts: Mutex<HashMap<String, Value>>,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chart(&self, id: &str, definition: Value) -> &Self {
        locked(&self.charts).insert(id.to_string(), definition);
        self
    }
}

impl MetadataSource for StaticMetadata {
    fn host_info(&self, host: &Host) -> Value {
        json!({
            "hostname": host.hostname(),
            "machine_guid": host.machine_guid(),
        })
    }

    fn charts(&self, _host: &Host) -> Value {
        Value::Object(locked(&self.charts).clone().into_iter().collect())
    }

    fn chart(&self, _host: &Host, chart_id: &str) -> Option<Value> {
        locked(&self.charts).get(chart_id).cloned()
    }
}
