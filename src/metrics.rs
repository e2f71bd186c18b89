use crate::keys::Provider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureMetrics {
    pub requests: u64,
    pub cache_misses: u64,
    pub provider_calls: HashMap<String, u64>,
    pub quota_skips: u64,
    pub unavailable: u64,
    pub upstream_failures: u64,
}

impl FeatureMetrics {
    pub fn cache_hits(&self) -> u64 {
        self.requests.saturating_sub(self.cache_misses)
    }
}

/// Process-local counters per feature, exposed on `/metrics`.
#[derive(Debug, Clone, Default)]
pub struct GatewayMetrics {
    features: Arc<RwLock<HashMap<&'static str, FeatureMetrics>>>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update(&self, feature: &'static str, f: impl FnOnce(&mut FeatureMetrics)) {
        let mut features = self.features.write().await;
        f(features.entry(feature).or_default());
    }

    pub async fn record_request(&self, feature: &'static str) {
        self.update(feature, |m| m.requests += 1).await;
    }

    pub async fn record_cache_miss(&self, feature: &'static str) {
        self.update(feature, |m| m.cache_misses += 1).await;
    }

    pub async fn record_provider_call(&self, feature: &'static str, provider: Provider) {
        self.update(feature, |m| {
            *m.provider_calls.entry(provider.to_string()).or_default() += 1;
        })
        .await;
    }

    pub async fn record_quota_skip(&self, feature: &'static str) {
        self.update(feature, |m| m.quota_skips += 1).await;
    }

    pub async fn record_unavailable(&self, feature: &'static str) {
        self.update(feature, |m| m.unavailable += 1).await;
    }

    pub async fn record_upstream_failure(&self, feature: &'static str) {
        self.update(feature, |m| m.upstream_failures += 1).await;
    }

    pub async fn feature(&self, feature: &str) -> Option<FeatureMetrics> {
        let features = self.features.read().await;
        features.get(feature).cloned()
    }

    pub async fn snapshot(&self) -> HashMap<String, FeatureMetrics> {
        let features = self.features.read().await;
        features
            .iter()
            .map(|(name, metrics)| (name.to_string(), metrics.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_per_feature() {
        let metrics = GatewayMetrics::new();
        metrics.record_request("geocoding").await;
        metrics.record_request("geocoding").await;
        metrics.record_cache_miss("geocoding").await;
        metrics.record_provider_call("geocoding", Provider::Mapbox).await;
        metrics.record_request("poi").await;

        let geo = metrics.feature("geocoding").await.unwrap();
        assert_eq!(geo.requests, 2);
        assert_eq!(geo.cache_hits(), 1);
        assert_eq!(geo.provider_calls.get("mapbox"), Some(&1));
        assert_eq!(metrics.snapshot().await.len(), 2);
    }
}
