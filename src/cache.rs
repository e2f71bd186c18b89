use crate::error::GatewayResult;
use crate::store::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Get-or-compute wrapper over the shared store.
///
/// Without single-flight, concurrent misses on one key each run their
/// producer. With it, callers on the same key queue behind a per-key lock and
/// re-read the cache once they hold it.
#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn KeyValueStore>,
    inflight: Option<Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>>,
}

impl CacheAside {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            inflight: None,
        }
    }

    pub fn with_single_flight(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            inflight: Some(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    pub fn is_single_flight(&self) -> bool {
        self.inflight.is_some()
    }

    /// Returns the cached value under `key`, or runs `producer`, stores its
    /// result for `ttl` and returns it. Producer errors are returned as-is and
    /// nothing is written.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> GatewayResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        if let Some(hit) = self.lookup(key).await? {
            return Ok(hit);
        }

        let Some(inflight) = &self.inflight else {
            return self.produce(key, ttl, producer).await;
        };

        let lock = {
            let mut map = inflight.lock().await;
            Arc::clone(map.entry(key.to_string()).or_default())
        };
        let _guard = lock.lock().await;

        let result = match self.lookup(key).await {
            Ok(Some(hit)) => Ok(hit),
            Ok(None) => self.produce(key, ttl, producer).await,
            Err(e) => Err(e),
        };

        // Later arrivals find the stored value, so the entry can go.
        let mut map = inflight.lock().await;
        if map.get(key).is_some_and(|current| Arc::ptr_eq(current, &lock)) {
            map.remove(key);
        }
        result
    }

    pub async fn invalidate(&self, key: &str) -> GatewayResult<bool> {
        Ok(self.store.del(key).await?)
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> GatewayResult<Option<T>> {
        let Some(raw) = self.store.get(key).await? else {
            tracing::debug!(target: "quota_gateway::cache", key, "cache miss");
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                tracing::debug!(target: "quota_gateway::cache", key, "cache hit");
                Ok(Some(value))
            }
            Err(e) => {
                tracing::warn!(
                    target: "quota_gateway::cache",
                    key,
                    error = %e,
                    "discarding unreadable cache entry"
                );
                Ok(None)
            }
        }
    }

    async fn produce<T, F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> GatewayResult<T>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let value = producer().await?;
        let encoded = serde_json::to_string(&value)?;
        self.store.set(key, &encoded, Some(ttl)).await?;
        tracing::debug!(
            target: "quota_gateway::cache",
            key,
            ttl_secs = ttl.as_secs(),
            "cache entry stored"
        );
        Ok(value)
    }
}
