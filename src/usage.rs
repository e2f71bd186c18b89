use crate::error::{GatewayError, GatewayResult, StoreError};
use crate::keys::{Action, Provider, UsageKey};
use crate::store::{KeyValueStore, ScriptHandle};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Monthly per-provider call counters kept in the shared store.
///
/// Increments go through the store's atomic script; reads are plain GETs.
pub struct UsageCounter {
    store: Arc<dyn KeyValueStore>,
    script: ScriptHandle,
    retention: Option<Duration>,
}

impl UsageCounter {
    /// Registers the increment script with the store.
    ///
    /// Failure here means the process cannot count usage and must not serve
    /// traffic, so it surfaces as a configuration error.
    pub async fn init(
        store: Arc<dyn KeyValueStore>,
        retention: Option<Duration>,
    ) -> GatewayResult<Self> {
        let script = store.register_increment_script().await.map_err(|e| {
            GatewayError::Configuration(format!("failed to register usage increment script: {}", e))
        })?;

        tracing::info!(
            target: "quota_gateway::usage",
            sha = %script.sha,
            "usage counter ready"
        );

        Ok(Self {
            store,
            script,
            retention,
        })
    }

    pub async fn increment(
        &self,
        provider: Provider,
        action: Action,
        endpoint: Option<&str>,
    ) -> GatewayResult<i64> {
        self.increment_at(provider, action, endpoint, Utc::now()).await
    }

    pub async fn increment_at(
        &self,
        provider: Provider,
        action: Action,
        endpoint: Option<&str>,
        at: DateTime<Utc>,
    ) -> GatewayResult<i64> {
        self.add(UsageKey::new(provider, action, endpoint, at), 1).await
    }

    /// Gives back one call, used to release a reservation that was not spent.
    pub async fn decrement(
        &self,
        provider: Provider,
        action: Action,
        endpoint: Option<&str>,
    ) -> GatewayResult<i64> {
        self.decrement_at(provider, action, endpoint, Utc::now()).await
    }

    pub async fn decrement_at(
        &self,
        provider: Provider,
        action: Action,
        endpoint: Option<&str>,
        at: DateTime<Utc>,
    ) -> GatewayResult<i64> {
        self.add(UsageKey::new(provider, action, endpoint, at), -1).await
    }

    pub async fn get_current(
        &self,
        provider: Provider,
        action: Action,
        endpoint: Option<&str>,
    ) -> GatewayResult<u64> {
        self.get_current_at(provider, action, endpoint, Utc::now()).await
    }

    /// Count for the month containing `at`; 0 when the counter does not exist yet.
    pub async fn get_current_at(
        &self,
        provider: Provider,
        action: Action,
        endpoint: Option<&str>,
        at: DateTime<Utc>,
    ) -> GatewayResult<u64> {
        let key = UsageKey::new(provider, action, endpoint, at).render();
        match self.store.get(&key).await? {
            None => Ok(0),
            Some(raw) => {
                let count = raw.trim().parse::<i64>().map_err(|_| StoreError::InvalidValue {
                    key: key.clone(),
                    value: raw.clone(),
                })?;
                Ok(count.max(0) as u64)
            }
        }
    }

    async fn add(&self, key: UsageKey, delta: i64) -> GatewayResult<i64> {
        let rendered = key.render();
        let total = self
            .store
            .increment_with_script(&self.script, &rendered, delta, self.retention)
            .await?;

        tracing::debug!(
            target: "quota_gateway::usage",
            key = %rendered,
            delta,
            total,
            "usage updated"
        );
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreResult;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct NoScriptStore;

    #[async_trait]
    impl KeyValueStore for NoScriptStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> StoreResult<()> {
            Ok(())
        }
        async fn del(&self, _key: &str) -> StoreResult<bool> {
            Ok(false)
        }
        async fn register_increment_script(&self) -> StoreResult<ScriptHandle> {
            Err(StoreError::Connection("connection refused".into()))
        }
        async fn increment_with_script(
            &self,
            _handle: &ScriptHandle,
            _key: &str,
            _delta: i64,
            _retention: Option<Duration>,
        ) -> StoreResult<i64> {
            unreachable!("counter must not exist without a script")
        }
        async fn ping(&self) -> StoreResult<String> {
            Ok("PONG".into())
        }
    }

    async fn counter() -> (UsageCounter, InMemoryStore) {
        let store = InMemoryStore::new();
        let counter = UsageCounter::init(Arc::new(store.clone()), None).await.unwrap();
        (counter, store)
    }

    #[tokio::test]
    async fn test_init_fails_loudly_without_script() {
        let result = UsageCounter::init(Arc::new(NoScriptStore), None).await;
        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_missing_counter_reads_zero() {
        let (counter, _) = counter().await;
        let current = counter
            .get_current(Provider::Mapbox, Action::Geocoding, None)
            .await
            .unwrap();
        assert_eq!(current, 0);
    }

    #[tokio::test]
    async fn test_increment_returns_running_total() {
        let (counter, store) = counter().await;
        let at = Utc.with_ymd_and_hms(2025, 6, 3, 8, 0, 0).unwrap();

        for expected in 1..=3 {
            let total = counter
                .increment_at(Provider::Here, Action::Geocoding, None, at)
                .await
                .unwrap();
            assert_eq!(total, expected);
        }
        assert_eq!(
            store.get("usage:2025-06:here:geocoding").await.unwrap().as_deref(),
            Some("3")
        );
    }

    #[tokio::test]
    async fn test_months_are_counted_separately() {
        let (counter, _) = counter().await;
        let december = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        let january = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        counter
            .increment_at(Provider::TomTom, Action::Poi, None, december)
            .await
            .unwrap();

        let jan = counter
            .get_current_at(Provider::TomTom, Action::Poi, None, january)
            .await
            .unwrap();
        let dec = counter
            .get_current_at(Provider::TomTom, Action::Poi, None, december)
            .await
            .unwrap();
        assert_eq!((dec, jan), (1, 0));
    }

    #[tokio::test]
    async fn test_endpoint_qualifier_has_its_own_counter() {
        let (counter, _) = counter().await;
        counter
            .increment(Provider::Mapbox, Action::Geocoding, Some("reverse"))
            .await
            .unwrap();

        let plain = counter
            .get_current(Provider::Mapbox, Action::Geocoding, None)
            .await
            .unwrap();
        let reverse = counter
            .get_current(Provider::Mapbox, Action::Geocoding, Some("reverse"))
            .await
            .unwrap();
        assert_eq!((plain, reverse), (0, 1));
    }

    #[tokio::test]
    async fn test_decrement_releases_a_call() {
        let (counter, _) = counter().await;
        counter
            .increment(Provider::Geoapify, Action::Poi, None)
            .await
            .unwrap();
        let total = counter
            .decrement(Provider::Geoapify, Action::Poi, None)
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_corrupt_counter_is_a_store_error() {
        let (counter, store) = counter().await;
        let at = Utc.with_ymd_and_hms(2025, 6, 3, 8, 0, 0).unwrap();
        store
            .set("usage:2025-06:here:routing", "garbage", None)
            .await
            .unwrap();

        let err = counter
            .get_current_at(Provider::Here, Action::Routing, None, at)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Store(StoreError::InvalidValue { .. })
        ));
    }
}
