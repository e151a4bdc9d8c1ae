use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::negotiation::{ACLK_VERSION_MAX, ACLK_VERSION_MIN};

/// Settings of the query worker pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    pub query_threads: usize,
    /// Quiet period after the last collector change before a host is stable.
    pub stable_timeout_secs: u64,
    pub version_negotiation_timeout_secs: u64,
    pub stats_enabled: bool,
    pub min_version: u32,
    pub max_version: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            query_threads: 2,
            stable_timeout_secs: 3,
            version_negotiation_timeout_secs: 5,
            stats_enabled: false,
            min_version: ACLK_VERSION_MIN,
            max_version: ACLK_VERSION_MAX,
        }
    }
}

impl QueryConfig {
    pub fn stable_timeout(&self) -> Duration {
        Duration::from_secs(self.stable_timeout_secs)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.version_negotiation_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: QueryConfig = serde_json::from_str(r#"{"query_threads": 6}"#).unwrap();
        assert_eq!(config.query_threads, 6);
        assert_eq!(config.stable_timeout(), Duration::from_secs(3));
        assert_eq!(config.min_version, ACLK_VERSION_MIN);
        assert!(!config.stats_enabled);
    }
}
