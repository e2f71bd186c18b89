//! Quota-gated, cache-aside provider selection shared by every feature.

use crate::cache::CacheAside;
use crate::error::{GatewayError, GatewayResult, UpstreamError};
use crate::keys::{cache_key, Action, Provider};
use crate::metrics::GatewayMetrics;
use crate::quota::{within_quota, QuotaGate};
use crate::store::KeyValueStore;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

/// Longest cache TTL a feature may configure.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(366 * 24 * 3600);

/// Describes one gateway feature: what it meters, how queries are keyed.
pub trait Feature: Send + Sync + 'static {
    const NAME: &'static str;
    const ACTION: Action;
    const DEFAULT_CACHE_TTL: Duration;

    type Query: Serialize + Send + Sync;
    type Output: Serialize + DeserializeOwned + Send + Sync;

    /// Logical prefix of the cache key, e.g. `geocode:forward`.
    fn cache_prefix(query: &Self::Query) -> &'static str;

    /// Canonical form used for the cache key. Semantically equal queries
    /// must normalize to equal values.
    fn normalize(query: &Self::Query) -> Self::Query;

    /// Optional qualifier appended to the usage key.
    fn endpoint(_query: &Self::Query) -> Option<&'static str> {
        None
    }
}

/// Client for one provider's implementation of a feature.
///
/// Adapters own transport, credentials and response normalization, and
/// translate every failure into an [`UpstreamError`].
#[async_trait]
pub trait ProviderAdapter<F: Feature>: Send + Sync {
    async fn call(&self, query: &F::Query) -> Result<F::Output, UpstreamError>;
}

pub struct ProviderRoute<F: Feature> {
    pub provider: Provider,
    pub adapter: Arc<dyn ProviderAdapter<F>>,
}

impl<F: Feature> ProviderRoute<F> {
    pub fn new(provider: Provider, adapter: Arc<dyn ProviderAdapter<F>>) -> Self {
        Self { provider, adapter }
    }
}

impl<F: Feature> Clone for ProviderRoute<F> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider,
            adapter: Arc::clone(&self.adapter),
        }
    }
}

/// How the quota check and the usage increment are sequenced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaMode {
    /// Check, call, then increment. Concurrent requests may overshoot the
    /// limit by the number in flight.
    #[default]
    Lenient,
    /// Increment first as a reservation, release it when the limit is
    /// exceeded or the adapter fails. Never overshoots.
    Strict,
}

impl FromStr for QuotaMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lenient" => Ok(QuotaMode::Lenient),
            "strict" => Ok(QuotaMode::Strict),
            other => Err(format!("unknown quota mode '{}'", other)),
        }
    }
}

impl fmt::Display for QuotaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaMode::Lenient => f.write_str("lenient"),
            QuotaMode::Strict => f.write_str("strict"),
        }
    }
}

/// Per-feature tuning, usually read from the gateway config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSettings {
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    #[serde(default)]
    pub quota_mode: QuotaMode,
    #[serde(default)]
    pub single_flight: bool,
}

impl FeatureSettings {
    pub fn for_feature<F: Feature>() -> Self {
        Self {
            cache_ttl: F::DEFAULT_CACHE_TTL,
            quota_mode: QuotaMode::default(),
            single_flight: false,
        }
    }
}

/// Shared dependencies handed to every gateway at startup.
#[derive(Clone)]
pub struct GatewayContext {
    pub store: Arc<dyn KeyValueStore>,
    pub quota: QuotaGate,
    pub metrics: GatewayMetrics,
}

pub struct ProviderGateway<F: Feature> {
    routes: Vec<ProviderRoute<F>>,
    quota: QuotaGate,
    cache: CacheAside,
    settings: FeatureSettings,
    metrics: GatewayMetrics,
}

impl<F: Feature> ProviderGateway<F> {
    /// `routes` is the priority order; the first usable provider wins.
    pub fn new(
        ctx: &GatewayContext,
        routes: Vec<ProviderRoute<F>>,
        settings: FeatureSettings,
    ) -> GatewayResult<Self> {
        if routes.is_empty() {
            return Err(GatewayError::Configuration(format!(
                "{} gateway has no providers",
                F::NAME
            )));
        }
        for (i, route) in routes.iter().enumerate() {
            if routes[..i].iter().any(|r| r.provider == route.provider) {
                return Err(GatewayError::Configuration(format!(
                    "{} gateway lists provider {} twice",
                    F::NAME,
                    route.provider
                )));
            }
        }
        if settings.cache_ttl.is_zero() || settings.cache_ttl > MAX_CACHE_TTL {
            return Err(GatewayError::Configuration(format!(
                "{} cache ttl must be between 1s and {}s",
                F::NAME,
                MAX_CACHE_TTL.as_secs()
            )));
        }

        let cache = if settings.single_flight {
            CacheAside::with_single_flight(Arc::clone(&ctx.store))
        } else {
            CacheAside::new(Arc::clone(&ctx.store))
        };

        tracing::info!(
            target: "quota_gateway::gateway",
            feature = F::NAME,
            providers = ?routes.iter().map(|r| r.provider).collect::<Vec<_>>(),
            quota_mode = %settings.quota_mode,
            single_flight = settings.single_flight,
            "gateway configured"
        );

        Ok(Self {
            routes,
            quota: ctx.quota.clone(),
            cache,
            settings,
            metrics: ctx.metrics.clone(),
        })
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.routes.iter().map(|r| r.provider).collect()
    }

    pub fn settings(&self) -> &FeatureSettings {
        &self.settings
    }

    pub fn cache_key(query: &F::Query) -> GatewayResult<String> {
        cache_key(F::cache_prefix(query), &F::normalize(query))
    }

    /// Cached result for `query`, computing and caching it on a miss.
    pub async fn fetch(&self, query: &F::Query) -> GatewayResult<F::Output> {
        let key = Self::cache_key(query)?;
        let span = tracing::info_span!(
            "fetch",
            feature = F::NAME,
            request_id = %Uuid::new_v4(),
            cache_key = %key
        );

        async {
            self.metrics.record_request(F::NAME).await;
            self.cache
                .get_or_set(&key, self.settings.cache_ttl, || async {
                    self.metrics.record_cache_miss(F::NAME).await;
                    self.select_and_call(query).await
                })
                .await
        }
        .instrument(span)
        .await
    }

    pub async fn invalidate(&self, query: &F::Query) -> GatewayResult<bool> {
        let key = Self::cache_key(query)?;
        self.cache.invalidate(&key).await
    }

    /// Walks the provider list and calls the first one with quota left.
    pub async fn select_and_call(&self, query: &F::Query) -> GatewayResult<F::Output> {
        match self.settings.quota_mode {
            QuotaMode::Lenient => self.select_lenient(query).await,
            QuotaMode::Strict => self.select_strict(query).await,
        }
    }

    async fn select_lenient(&self, query: &F::Query) -> GatewayResult<F::Output> {
        let endpoint = F::endpoint(query);
        let counter = self.quota.counter();
        let mut exhausted = Vec::with_capacity(self.routes.len());

        for route in &self.routes {
            let provider = route.provider;
            let limit = self.quota.limit(provider, F::ACTION, endpoint);
            let current = counter.get_current(provider, F::ACTION, endpoint).await?;

            if !within_quota(current, limit) {
                self.skip(provider, current, limit, &mut exhausted).await;
                continue;
            }

            let output = self.call_adapter(route, query).await?;
            counter.increment(provider, F::ACTION, endpoint).await?;
            return Ok(output);
        }

        Err(self.unavailable(exhausted).await)
    }

    async fn select_strict(&self, query: &F::Query) -> GatewayResult<F::Output> {
        let endpoint = F::endpoint(query);
        let counter = self.quota.counter();
        let mut exhausted = Vec::with_capacity(self.routes.len());

        for route in &self.routes {
            let provider = route.provider;
            let limit = self.quota.limit(provider, F::ACTION, endpoint);
            if limit == Some(0) {
                let used = counter.get_current(provider, F::ACTION, endpoint).await?;
                self.skip(provider, used, limit, &mut exhausted).await;
                continue;
            }

            let reserved = counter.increment(provider, F::ACTION, endpoint).await?.max(0) as u64;
            if limit.is_some_and(|limit| reserved > limit) {
                counter.decrement(provider, F::ACTION, endpoint).await?;
                self.skip(provider, reserved - 1, limit, &mut exhausted).await;
                continue;
            }

            return match self.call_adapter(route, query).await {
                Ok(output) => Ok(output),
                Err(err) => {
                    if let Err(rollback) = counter.decrement(provider, F::ACTION, endpoint).await {
                        tracing::warn!(
                            target: "quota_gateway::gateway",
                            feature = F::NAME,
                            provider = %provider,
                            error = %rollback,
                            "failed to release quota reservation"
                        );
                    }
                    Err(err)
                }
            };
        }

        Err(self.unavailable(exhausted).await)
    }

    async fn call_adapter(&self, route: &ProviderRoute<F>, query: &F::Query) -> GatewayResult<F::Output> {
        let provider = route.provider;
        self.metrics.record_provider_call(F::NAME, provider).await;
        tracing::debug!(
            target: "quota_gateway::gateway",
            feature = F::NAME,
            provider = %provider,
            "calling provider"
        );

        match route.adapter.call(query).await {
            Ok(output) => Ok(output),
            Err(source) => {
                self.metrics.record_upstream_failure(F::NAME).await;
                tracing::warn!(
                    target: "quota_gateway::gateway",
                    feature = F::NAME,
                    provider = %provider,
                    error = %source,
                    "provider call failed"
                );
                Err(GatewayError::Upstream { provider, source })
            }
        }
    }

    async fn skip(
        &self,
        provider: Provider,
        used: u64,
        limit: Option<u64>,
        exhausted: &mut Vec<String>,
    ) {
        self.metrics.record_quota_skip(F::NAME).await;
        tracing::debug!(
            target: "quota_gateway::gateway",
            feature = F::NAME,
            provider = %provider,
            used,
            limit = ?limit,
            "provider quota exhausted, trying next"
        );
        let limit = limit.map(|l| l.to_string()).unwrap_or_else(|| "unlimited".into());
        exhausted.push(format!("{} used {}/{}", provider, used, limit));
    }

    async fn unavailable(&self, exhausted: Vec<String>) -> GatewayError {
        self.metrics.record_unavailable(F::NAME).await;
        tracing::warn!(
            target: "quota_gateway::gateway",
            feature = F::NAME,
            "all providers exhausted their monthly quota"
        );
        GatewayError::QuotaExhausted {
            feature: F::NAME,
            reason: format!(
                "{} quota exhausted for every provider ({})",
                F::NAME,
                exhausted.join(", ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_mode_parsing() {
        assert_eq!("Strict".parse::<QuotaMode>().unwrap(), QuotaMode::Strict);
        assert_eq!(" lenient ".parse::<QuotaMode>().unwrap(), QuotaMode::Lenient);
        assert!("eventual".parse::<QuotaMode>().is_err());
    }

    #[test]
    fn test_feature_settings_from_json() {
        let settings: FeatureSettings =
            serde_json::from_str(r#"{"cache_ttl": "7d", "quota_mode": "strict"}"#).unwrap();
        assert_eq!(settings.cache_ttl, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(settings.quota_mode, QuotaMode::Strict);
        assert!(!settings.single_flight);
    }
}
