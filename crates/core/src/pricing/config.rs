//! Pricing cache configuration.

use serde::{Deserialize, Serialize};

/// TTLs of the pricing cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Site catalog TTL in seconds.
    #[serde(default = "default_site_ttl")]
    pub site_ttl_secs: u64,
    /// Per-asset quote TTL in seconds.
    #[serde(default = "default_asset_ttl")]
    pub asset_ttl_secs: u64,
}

fn default_site_ttl() -> u64 {
    3600
}

fn default_asset_ttl() -> u64 {
    1800
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            site_ttl_secs: default_site_ttl(),
            asset_ttl_secs: default_asset_ttl(),
        }
    }
}
