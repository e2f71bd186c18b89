use crate::config::{Config, GatewayFile};
use crate::error::GatewayError;
use crate::gateway::MAX_CACHE_TTL;
use std::net::SocketAddr;

const FEATURES: [&str; 3] = ["geocoding", "poi", "matrix"];

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// An empty URL is allowed and selects the in-process store.
    pub fn validate_redis_url(url: &str) -> Result<(), GatewayError> {
        let url = url.trim();
        if url.is_empty() {
            return Ok(());
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(GatewayError::Configuration(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_bind_address(address: &SocketAddr) -> Result<(), GatewayError> {
        if address.port() == 0 {
            return Err(GatewayError::Configuration(
                "Bind port must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Rejects unknown feature names and TTLs outside `1s..=MAX_CACHE_TTL`.
    pub fn validate_gateway_file(file: &GatewayFile) -> Result<(), GatewayError> {
        for (name, settings) in &file.features {
            if !FEATURES.contains(&name.as_str()) {
                return Err(GatewayError::Configuration(format!(
                    "Unknown feature '{}'. Must be one of: {:?}",
                    name, FEATURES
                )));
            }
            if settings.cache_ttl.is_zero() {
                return Err(GatewayError::Configuration(format!(
                    "Cache TTL for '{}' must be greater than 0",
                    name
                )));
            }
            if settings.cache_ttl > MAX_CACHE_TTL {
                return Err(GatewayError::Configuration(format!(
                    "Cache TTL for '{}' must not exceed {} days",
                    name,
                    MAX_CACHE_TTL.as_secs() / 86_400
                )));
            }
        }

        file.quotas.check()
    }

    pub fn validate_config(config: &Config) -> Result<(), GatewayError> {
        Self::validate_bind_address(&config.bind_addr)?;
        Self::validate_redis_url(&config.redis_url)?;
        config.usage_retention()?;
        Ok(())
    }
}
