//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the order orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Spawn a background poller for every placed order.
    /// When disabled, orders must be polled via `poll_order`.
    #[serde(default = "default_true")]
    pub background_polling: bool,

    /// Delay between status polls (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Polls before a processing order times out.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Refund the charge when the vendor reports a failed order while
    /// polling. Orders the vendor refuses at placement are always refunded.
    #[serde(default = "default_true")]
    pub refund_on_vendor_error: bool,

    /// Re-attach pollers to in-flight orders on start.
    #[serde(default = "default_true")]
    pub recover_on_start: bool,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    2000 // 2 seconds
}

fn default_max_poll_attempts() -> u32 {
    60
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            background_polling: true,
            poll_interval_ms: default_poll_interval(),
            max_poll_attempts: default_max_poll_attempts(),
            refund_on_vendor_error: true,
            recover_on_start: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert!(config.background_polling);
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(config.max_poll_attempts, 60);
        assert!(config.refund_on_vendor_error);
        assert!(config.recover_on_start);
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: OrchestratorConfig = toml::from_str("").unwrap();
        assert!(config.background_polling);
        assert_eq!(config.poll_interval_ms, 2000);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            background_polling = false
            poll_interval_ms = 500
            max_poll_attempts = 10
            refund_on_vendor_error = false
            recover_on_start = false
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert!(!config.background_polling);
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.max_poll_attempts, 10);
        assert!(!config.refund_on_vendor_error);
        assert!(!config.recover_on_start);
    }
}
