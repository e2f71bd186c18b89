use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{Feature, FeatureSettings};
use crate::quota::QuotaTable;
use envconfig::Envconfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Ten years.
pub const MAX_USAGE_RETENTION_DAYS: u64 = 3_660;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Operational API bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL; empty selects the in-process store
    #[envconfig(from = "REDIS_URL", default = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Path to the JSON gateway file (quotas and feature settings)
    #[envconfig(from = "GATEWAY_CONFIG")]
    pub gateway_config: Option<String>,

    /// Default log filter level
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Days a monthly usage counter is kept by the store; 0 keeps it forever
    #[envconfig(from = "USAGE_RETENTION_DAYS", default = "62")]
    pub usage_retention_days: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn uses_redis(&self) -> bool {
        !self.redis_url.trim().is_empty()
    }

    pub fn usage_retention(&self) -> GatewayResult<Option<Duration>> {
        match self.usage_retention_days {
            0 => Ok(None),
            days if days <= MAX_USAGE_RETENTION_DAYS => days
                .checked_mul(86_400)
                .map(|secs| Some(Duration::from_secs(secs)))
                .ok_or_else(|| Self::retention_error(days)),
            days => Err(Self::retention_error(days)),
        }
    }

    fn retention_error(days: u64) -> GatewayError {
        GatewayError::Configuration(format!(
            "USAGE_RETENTION_DAYS must be at most {}, got {}",
            MAX_USAGE_RETENTION_DAYS, days
        ))
    }
}

/// Contents of the gateway file.
///
/// ```json
/// {
///   "quotas": { "rules": [{ "provider": "mapbox", "action": "geocoding", "limit": 100000 }] },
///   "features": { "geocoding": { "cache_ttl": "30d", "quota_mode": "strict" } }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayFile {
    #[serde(default)]
    pub quotas: QuotaTable,
    #[serde(default)]
    pub features: HashMap<String, FeatureSettings>,
}

impl GatewayFile {
    pub fn from_json_str(raw: &str) -> GatewayResult<Self> {
        let file: Self = serde_json::from_str(raw)
            .map_err(|e| GatewayError::Configuration(format!("invalid gateway file: {}", e)))?;
        file.quotas.check()?;
        Ok(file)
    }

    pub fn load(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Settings for `F`, falling back to the feature defaults.
    pub fn settings_for<F: Feature>(&self) -> FeatureSettings {
        self.features
            .get(F::NAME)
            .cloned()
            .unwrap_or_else(FeatureSettings::for_feature::<F>)
    }
}
