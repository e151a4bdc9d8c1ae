//! Local query engine and metadata source backed by `sysinfo`
//!
//! Serves a small slice of the `/api/v1/` surface from live system data:
//! - `info`: host identity, OS and uptime
//! - `data`: one chart (`chart=system.cpu` or `chart=system.ram`)
//! - `allmetrics`: every chart at once
//! - `charts`: chart definitions
//!
//! Anything else answers 404.

use aclk_query::{ApiResponse, Host, MetadataSource, QueryEngine};
use serde::Serialize;
use serde_json::{json, Value};
use sysinfo::System;
use tracing::debug;

use crate::discovery::SystemInfo;

pub const CHART_CPU: &str = "system.cpu";
pub const CHART_RAM: &str = "system.ram";

/// CPU usage metrics
#[derive(Debug, Serialize)]
pub struct CpuMetrics {
    pub percent: f32,
    pub load_avg: [f64; 3], // [1min, 5min, 15min]
    pub core_count: usize,
}

/// Memory usage metrics
#[derive(Debug, Serialize)]
pub struct MemoryMetrics {
    pub total_mb: u64,
    pub used_mb: u64,
    pub available_mb: u64,
    pub percent_used: f32,
}

impl CpuMetrics {
    fn collect(sys: &System) -> Self {
        let load = System::load_average();
        CpuMetrics {
            percent: sys.global_cpu_info().cpu_usage(),
            load_avg: [load.one, load.five, load.fifteen],
            core_count: sys.cpus().len(),
        }
    }
}

impl MemoryMetrics {
    fn collect(sys: &System) -> Self {
        let total_bytes = sys.total_memory();
        let available_bytes = sys.available_memory();
        let used_bytes = total_bytes.saturating_sub(available_bytes);

        let percent_used = if total_bytes > 0 {
            (used_bytes as f32 / total_bytes as f32) * 100.0
        } else {
            0.0
        };

        MemoryMetrics {
            total_mb: total_bytes / (1024 * 1024),
            used_mb: used_bytes / (1024 * 1024),
            available_mb: available_bytes / (1024 * 1024),
            percent_used,
        }
    }
}

/// Look up `key` in an already decoded query string.
fn query_param<'a>(query_string: &'a str, key: &str) -> Option<&'a str> {
    query_string
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find_map(|(k, v)| (k == key).then_some(v))
}

fn chart_definition(host: &Host, id: &str) -> Option<Value> {
    let (title, units, dimensions) = match id {
        CHART_CPU => ("Total CPU utilization", "percentage", json!(["percent"])),
        CHART_RAM => ("System RAM", "MiB", json!(["used", "available"])),
        _ => return None,
    };
    Some(json!({
        "id": id,
        "name": id,
        "type": "system",
        "title": title,
        "units": units,
        "dimensions": dimensions,
        "node-id": host.machine_guid(),
    }))
}

pub struct SysinfoEngine {
    system: SystemInfo,
}

impl SysinfoEngine {
    pub fn new(system: SystemInfo) -> Self {
        Self { system }
    }

    fn info(&self, host: &Host) -> Value {
        json!({
            "hostname": host.hostname(),
            "machine_guid": host.machine_guid(),
            "os": self.system.os,
            "architecture": self.system.architecture,
            "kernel_version": System::kernel_version(),
            "os_version": System::long_os_version(),
            "uptime_seconds": System::uptime(),
            "agent_version": env!("CARGO_PKG_VERSION"),
        })
    }

    fn chart_values(id: &str, sys: &System) -> Option<Value> {
        match id {
            CHART_CPU => serde_json::to_value(CpuMetrics::collect(sys)).ok(),
            CHART_RAM => serde_json::to_value(MemoryMetrics::collect(sys)).ok(),
            _ => None,
        }
    }

    fn refreshed_system() -> System {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();
        sys
    }
}

impl QueryEngine for SysinfoEngine {
    fn execute(&self, host: &Host, endpoint: &str, query_string: &str) -> ApiResponse {
        debug!("Local API call {} ({}) for {}", endpoint, query_string, host.hostname());
        match endpoint {
            "info" => ApiResponse::json(200, &self.info(host)),
            "charts" => ApiResponse::json(200, &SysinfoMetadata::charts_for(host)),
            "allmetrics" => {
                let sys = Self::refreshed_system();
                let all: serde_json::Map<String, Value> = [CHART_CPU, CHART_RAM]
                    .into_iter()
                    .filter_map(|id| Some((id.to_string(), Self::chart_values(id, &sys)?)))
                    .collect();
                ApiResponse::json(200, &Value::Object(all))
            }
            "data" => {
                let Some(chart) = query_param(query_string, "chart") else {
                    return ApiResponse::new(400, "No chart id is given at the request.");
                };
                match Self::chart_values(chart, &Self::refreshed_system()) {
                    Some(values) => ApiResponse::json(200, &json!({ "id": chart, "result": values })),
                    None => ApiResponse::new(404, format!("Chart is not found: {}", chart)),
                }
            }
            _ => ApiResponse::not_found(endpoint),
        }
    }
}

/// Chart definitions for the metadata messages.
pub struct SysinfoMetadata {
    system: SystemInfo,
}

impl SysinfoMetadata {
    pub fn new(system: SystemInfo) -> Self {
        Self { system }
    }

    fn charts_for(host: &Host) -> Value {
        let charts: serde_json::Map<String, Value> = [CHART_CPU, CHART_RAM]
            .into_iter()
            .filter_map(|id| Some((id.to_string(), chart_definition(host, id)?)))
            .collect();
        Value::Object(charts)
    }
}

impl MetadataSource for SysinfoMetadata {
    fn host_info(&self, host: &Host) -> Value {
        json!({
            "hostname": host.hostname(),
            "machine_guid": host.machine_guid(),
            "os": self.system.os,
            "architecture": self.system.architecture,
            "cores": System::new().physical_core_count(),
        })
    }

    fn charts(&self, host: &Host) -> Value {
        Self::charts_for(host)
    }

    fn chart(&self, host: &Host, chart_id: &str) -> Option<Value> {
        chart_definition(host, chart_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system() -> SystemInfo {
        SystemInfo::discover("parent", Some("guid-parent"))
    }

    fn body_json(response: &ApiResponse) -> Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn test_info_endpoint() {
        let host = Host::new("parent", "guid-parent");
        let response = SysinfoEngine::new(system()).execute(&host, "info", "");
        assert_eq!(response.code, 200);
        assert_eq!(body_json(&response)["machine_guid"], "guid-parent");
        assert_eq!(response.headers, b"Content-Type: application/json\r\n".to_vec());
    }

    #[test]
    fn test_data_endpoint() {
        let host = Host::new("parent", "guid-parent");
        let engine = SysinfoEngine::new(system());

        let response = engine.execute(&host, "data", "chart=system.ram&after=-60");
        assert_eq!(response.code, 200);
        let body = body_json(&response);
        assert!(body["result"]["total_mb"].as_u64().unwrap() > 0);

        assert_eq!(engine.execute(&host, "data", "after=-60").code, 400);
        assert_eq!(engine.execute(&host, "data", "chart=disk.sda").code, 404);
    }

    #[test]
    fn test_unknown_endpoint() {
        let host = Host::new("parent", "guid-parent");
        assert_eq!(SysinfoEngine::new(system()).execute(&host, "badges.svg", "").code, 404);
    }

    #[test]
    fn test_metadata_charts() {
        let host = Host::new("parent", "guid-parent");
        let metadata = SysinfoMetadata::new(system());
        assert_eq!(metadata.charts(&host)[CHART_CPU]["units"], "percentage");
        assert_eq!(metadata.chart(&host, CHART_RAM).unwrap()["node-id"], "guid-parent");
        assert!(metadata.chart(&host, "disk.sda").is_none());
    }

    #[test]
    fn test_query_param() {
        assert_eq!(query_param("chart=system.cpu&after=-60", "after"), Some("-60"));
        assert_eq!(query_param("chart", "chart"), None);
    }
}
