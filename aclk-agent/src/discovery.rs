//! Host identification for the ACLK link
//!
//! The machine guid comes from the configuration when set, otherwise from
//! the primary MAC address (Ethernet first, then WiFi, then anything), and
//! as a last resort from a random UUID that the caller persists.

use anyhow::{Context, Result};
use if_addrs::get_if_addrs;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Ethernet,
    Wireless,
    Other,
    Loopback,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkInterface {
    pub name: String,
    pub mac: String,
    pub interface_type: InterfaceType,
}

/// Identity of the host this agent runs on.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub machine_guid: String,
    pub hostname: String,
    pub os: String,
    pub architecture: String,
}

impl SystemInfo {
    pub fn discover(hostname: &str, configured_guid: Option<&str>) -> Self {
        let hostname = if hostname.is_empty() {
            gethostname::gethostname().to_string_lossy().to_string()
        } else {
            hostname.to_string()
        };

        let machine_guid = match configured_guid {
            Some(guid) => guid.to_string(),
            None => match primary_mac() {
                Ok(mac) => mac.replace(':', ""),
                Err(e) => {
                    warn!("No usable MAC address ({}), generating a machine guid", e);
                    uuid::Uuid::new_v4().to_string()
                }
            },
        };

        let info = SystemInfo {
            machine_guid,
            hostname,
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
        };
        info!(
            "Discovery complete - guid: {}, hostname: {}, OS: {}",
            info.machine_guid, info.hostname, info.os
        );
        info
    }
}

fn primary_mac() -> Result<String> {
    let mut interfaces = Vec::new();
    for if_addr in get_if_addrs().context("Failed to enumerate network interfaces")? {
        if if_addr.is_loopback() || interfaces.iter().any(|i: &NetworkInterface| i.name == if_addr.name) {
            continue;
        }
        match mac_address::mac_address_by_name(&if_addr.name) {
            Ok(Some(mac)) => {
                debug!("Found interface: {} ({})", if_addr.name, mac);
                interfaces.push(NetworkInterface {
                    interface_type: classify_interface(&if_addr.name),
                    mac: mac.to_string().to_lowercase(),
                    name: if_addr.name,
                });
            }
            Ok(None) => debug!("No MAC found for interface: {}", if_addr.name),
            Err(e) => debug!("Error getting MAC for {}: {}", if_addr.name, e),
        }
    }
    select_primary(&interfaces)
        .map(|iface| {
            info!("Selected {:?} interface as primary: {}", iface.interface_type, iface.name);
            iface.mac.clone()
        })
        .ok_or_else(|| anyhow::anyhow!("No suitable network interface found"))
}

/// Classify interface type based on name patterns
fn classify_interface(name: &str) -> InterfaceType {
    let name = name.to_lowercase();
    if name == "lo" || name.starts_with("lo0") || name.contains("loopback") {
        InterfaceType::Loopback
    } else if ["wlan", "wifi", "wlp", "wlo"].iter().any(|p| name.contains(p)) {
        InterfaceType::Wireless
    } else if ["eth", "en"].iter().any(|p| name.starts_with(p)) {
        InterfaceType::Ethernet
    } else {
        InterfaceType::Other
    }
}

fn select_primary(interfaces: &[NetworkInterface]) -> Option<&NetworkInterface> {
    interfaces
        .iter()
        .filter(|iface| iface.interface_type != InterfaceType::Loopback)
        .min_by_key(|iface| iface.interface_type)
}
