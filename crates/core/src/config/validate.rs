use super::{types::Config, AuthMethod, ConfigError};

/// Validate configuration beyond what serde enforces.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let fail = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

    if config.server.port == 0 {
        return fail("server.port cannot be 0");
    }
    if config.auth.method == AuthMethod::ApiKey
        && config.auth.api_key.as_deref().unwrap_or("").is_empty()
    {
        return fail("auth.api_key is required when auth.method = \"api_key\"");
    }
    if config.vendor.base_url.trim().is_empty() {
        return fail("vendor.base_url cannot be empty");
    }
    if config.vendor.timeout_secs == 0 {
        return fail("vendor.timeout_secs cannot be 0");
    }
    if config.orchestrator.max_poll_attempts == 0 {
        return fail("orchestrator.max_poll_attempts must be at least 1");
    }
    if config.orchestrator.poll_interval_ms == 0 {
        return fail("orchestrator.poll_interval_ms cannot be 0");
    }
    if config.pricing.site_ttl_secs == 0 || config.pricing.asset_ttl_secs == 0 {
        return fail("pricing TTLs cannot be 0");
    }

    Ok(())
}
