//! Agent configuration
//!
//! Handles:
//! - MQTT broker and topic settings
//! - Query worker pool settings
//! - Host identity overrides
//! - Environment overrides on top of the TOML file

use aclk_query::QueryConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub mqtt: MqttConfig,
    pub aclk: QueryConfig,
    pub agent: AgentInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: Option<String>,
    pub keep_alive_secs: u16,
    /// Topic the cloud publishes commands on.
    pub inbound_topic: String,
    /// Prefix for outbound topics given without a `/`.
    pub outbound_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentInfo {
    pub hostname: String,
    /// Derived from the primary MAC address when unset.
    pub machine_guid: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: None,
            keep_alive_secs: 60,
            inbound_topic: "aclk/inbound".to_string(),
            outbound_prefix: "aclk/outbound".to_string(),
        }
    }
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            hostname: hostname::get().unwrap_or_default().to_string_lossy().to_string(),
            machine_guid: None,
        }
    }
}

impl AgentConfig {
    /// Load config from the OS-specific location, then apply env overrides
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        let mut config = Self::load_from(&config_path).await?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First start - defaults
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Save config to the OS-specific location
    pub async fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        path.push("aclk-agent");
        path.push("config.toml");
        Ok(path)
    }

    /// `ACLK_MQTT_HOST`, `ACLK_MQTT_PORT` and `ACLK_QUERY_THREADS` win over the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("ACLK_MQTT_HOST") {
            self.mqtt.broker_host = host;
        }
        if let Some(port) = lookup("ACLK_MQTT_PORT") {
            match port.parse() {
                Ok(port) => self.mqtt.broker_port = port,
                Err(_) => warn!("Ignoring invalid ACLK_MQTT_PORT: {}", port),
            }
        }
        if let Some(threads) = lookup("ACLK_QUERY_THREADS") {
            match threads.parse::<usize>() {
                Ok(threads) if threads > 0 => self.aclk.query_threads = threads,
                _ => warn!("Ignoring invalid ACLK_QUERY_THREADS: {}", threads),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.aclk.query_threads, 2);
        assert!(config.agent.machine_guid.is_none());
    }

    #[test]
    fn test_config_file_path() {
        let path = AgentConfig::config_file_path().unwrap();
        assert!(path.to_string_lossy().contains("aclk-agent"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ACLK_MQTT_HOST", "broker.local"),
            ("ACLK_MQTT_PORT", "not-a-port"),
            ("ACLK_QUERY_THREADS", "6"),
        ]);
        let mut config = AgentConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.mqtt.broker_host, "broker.local");
        assert_eq!(config.mqtt.broker_port, 1883);
        assert_eq!(config.aclk.query_threads, 6);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AgentConfig::default();
        config.aclk.stats_enabled = true;
        config.agent.machine_guid = Some("a1b2c3d4e5f6".to_string());
        config.save_to(&path).await.unwrap();

        let loaded = AgentConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[aclk]\nquery_threads = 4\n").await.unwrap();

        let loaded = AgentConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded.aclk.query_threads, 4);
        assert_eq!(loaded.aclk.stable_timeout_secs, 3);
        assert_eq!(loaded.mqtt.inbound_topic, "aclk/inbound");
    }
}
