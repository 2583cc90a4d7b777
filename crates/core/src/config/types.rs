use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::orchestrator::OrchestratorConfig;
use crate::pricing::PricingConfig;
use crate::vendor::{ResponseType, VendorConfig};

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub vendor: VendorConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    /// Required when `method = "api_key"`.
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    ApiKey,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::ApiKey => "api_key",
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("stockdesk.db")
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub auth: SanitizedAuthConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub vendor: SanitizedVendorConfig,
    pub pricing: PricingConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAuthConfig {
    pub method: String,
    pub api_key_configured: bool,
}

/// Vendor config with the API key hidden.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedVendorConfig {
    pub base_url: String,
    pub api_key_configured: bool,
    pub api_key_header: String,
    pub timeout_secs: u64,
    pub response_type: ResponseType,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            auth: SanitizedAuthConfig {
                method: config.auth.method.as_str().to_string(),
                api_key_configured: config
                    .auth
                    .api_key
                    .as_ref()
                    .is_some_and(|k| !k.is_empty()),
            },
            server: config.server.clone(),
            database: config.database.clone(),
            vendor: SanitizedVendorConfig {
                base_url: config.vendor.base_url.clone(),
                api_key_configured: !config.vendor.api_key.is_empty(),
                api_key_header: config.vendor.api_key_header.clone(),
                timeout_secs: config.vendor.timeout_secs,
                response_type: config.vendor.response_type,
            },
            pricing: config.pricing.clone(),
            orchestrator: config.orchestrator.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[auth]
method = "none"

[vendor]
base_url = "https://vendor.example.com/api"
"#;

    #[test]
    fn test_deserialize_minimal_uses_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.auth.method, AuthMethod::None);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "stockdesk.db");
        assert_eq!(config.pricing.site_ttl_secs, 3600);
        assert_eq!(config.orchestrator.max_poll_attempts, 60);
        assert_eq!(config.vendor.timeout_secs, 20);
    }

    #[test]
    fn test_deserialize_missing_vendor_fails() {
        let toml = r#"
[auth]
method = "none"
"#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_deserialize_missing_auth_fails() {
        let toml = r#"
[vendor]
base_url = "http://localhost:1"
"#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
[auth]
method = "api_key"
api_key = "service-key"

[server]
host = "127.0.0.1"
port = 9000

[database]
path = "/data/stockdesk.sqlite"

[vendor]
base_url = "https://vendor.example.com/api"
api_key = "vendor-key"
response_type = "mydrivelink"

[pricing]
site_ttl_secs = 60
asset_ttl_secs = 30

[orchestrator]
poll_interval_ms = 500
max_poll_attempts = 12
refund_on_vendor_error = false
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.auth.method, AuthMethod::ApiKey);
        assert_eq!(config.auth.api_key.as_deref(), Some("service-key"));
        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.database.path.to_str().unwrap(),
            "/data/stockdesk.sqlite"
        );
        assert_eq!(config.vendor.response_type, ResponseType::Mydrivelink);
        assert_eq!(config.pricing.asset_ttl_secs, 30);
        assert_eq!(config.orchestrator.max_poll_attempts, 12);
        assert!(!config.orchestrator.refund_on_vendor_error);
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.vendor.api_key = "vendor-secret".to_string();
        config.auth.api_key = Some("service-secret".to_string());

        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.auth.method, "none");
        assert!(sanitized.auth.api_key_configured);
        assert!(sanitized.vendor.api_key_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("vendor-secret"));
        assert!(!json.contains("service-secret"));
    }
}
