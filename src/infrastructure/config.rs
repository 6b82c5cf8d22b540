//! Harvester configuration.
//!
//! Defaults reflect observed behavior of the host page: a virtualized list
//! that reveals roughly a viewport of cards per scroll trigger, settling
//! within a couple of seconds.

use serde::{Deserialize, Serialize};

/// Hardcoded fallback for the remote ingestion endpoint. Overridable per run
/// (explicit argument) or per installation (store key `apiBaseUrl`).
pub const DEFAULT_API_URL: &str = "https://api.syncvault.app/v1/connections";

/// Origin of the host page, used to absolutize relative profile links.
pub const HOST_ORIGIN: &str = "https://www.linkedin.com";

/// Path segment of the page the harvesting logic requires. A run started
/// elsewhere navigates here first, persisting a resume token.
pub const CONNECTIONS_PATH: &str = "/mynetwork/invite-connect/connections";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HarvesterConfig {
    /// Maximum records per batch sent through the relay.
    pub batch_size: usize,

    /// Smaller batch size for the immediate pass over records already
    /// rendered when a run starts, so an instantly-cancelled run still
    /// yields partial data quickly.
    pub fast_batch_size: usize,

    /// Delay after each scroll trigger before re-reading the page, in
    /// milliseconds.
    pub settle_delay_ms: u64,

    /// Consecutive no-growth cycles before the run is considered drained.
    pub max_attempts_without_growth: u32,

    /// Bounded wait for the list container to appear before proceeding
    /// best-effort with broadened selectors, in milliseconds.
    pub container_wait_ms: u64,

    /// Fallback ingestion endpoint.
    pub default_api_url: String,

    /// Path segment identifying the connections page.
    pub connections_path: String,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            batch_size: 300,
            fast_batch_size: 50,
            settle_delay_ms: 1500,
            max_attempts_without_growth: 10,
            container_wait_ms: 5000,
            default_api_url: DEFAULT_API_URL.to_string(),
            connections_path: CONNECTIONS_PATH.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = HarvesterConfig::default();
        assert_eq!(config.batch_size, 300);
        assert!(config.fast_batch_size < config.batch_size);
        assert_eq!(config.max_attempts_without_growth, 10);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let config: HarvesterConfig = serde_json::from_str(r#"{"batchSize": 10}"#).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.settle_delay_ms, 1500);
    }
}
