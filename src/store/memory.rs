use super::{KeyValueStore, ScriptHandle, INCREMENT_SCRIPT};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Process-local store used when no Redis URL is configured.
///
/// Entries expire passively: an expired entry is dropped the next time its
/// key is touched. Increments run under the map lock, so they never race.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    closed: Arc<AtomicBool>,
}

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time to live of `key`, `None` when absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entries = self.entries.lock().ok()?;
        entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn expiry(key: &str, now: Instant, ttl: Duration) -> StoreResult<Instant> {
        now.checked_add(ttl).ok_or_else(|| StoreError::InvalidValue {
            key: key.to_string(),
            value: format!("ttl of {}s", ttl.as_secs()),
        })
    }

    fn with_entries<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Entry>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Internal("Failed to acquire store lock".to_string()))?;
        f(&mut entries)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_entries(|entries| {
            let now = Instant::now();
            match entries.get(key) {
                Some(entry) if entry.is_expired(now) => {
                    entries.remove(key);
                    Ok(None)
                }
                Some(entry) => Ok(Some(entry.value.clone())),
                None => Ok(None),
            }
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.with_entries(|entries| {
            let expires_at = ttl
                .map(|ttl| Self::expiry(key, Instant::now(), ttl))
                .transpose()?;
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at,
                },
            );
            Ok(())
        })
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.with_entries(|entries| Ok(entries.remove(key).is_some()))
    }

    async fn register_increment_script(&self) -> StoreResult<ScriptHandle> {
        Ok(ScriptHandle {
            sha: "in-memory-incrby".to_string(),
            source: Arc::from(INCREMENT_SCRIPT),
        })
    }

    async fn increment_with_script(
        &self,
        _handle: &ScriptHandle,
        key: &str,
        delta: i64,
        retention: Option<Duration>,
    ) -> StoreResult<i64> {
        self.with_entries(|entries| {
            let now = Instant::now();
            let (current, expires_at) = match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    let current = entry.value.parse::<i64>().map_err(|_| {
                        StoreError::InvalidValue {
                            key: key.to_string(),
                            value: entry.value.clone(),
                        }
                    })?;
                    (current, entry.expires_at)
                }
                _ => (0, None),
            };

            let total = current + delta;
            let expires_at = match (expires_at, retention) {
                (Some(at), _) => Some(at),
                (None, Some(retention)) => Some(Self::expiry(key, now, retention)?),
                (None, None) => None,
            };
            entries.insert(
                key.to_string(),
                Entry {
                    value: total.to_string(),
                    expires_at,
                },
            );
            Ok(total)
        })
    }

    async fn ping(&self) -> StoreResult<String> {
        self.with_entries(|_| Ok("PONG".to_string()))
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let store = InMemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.del("k").await.unwrap());
        assert!(!store.del("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire_passively() {
        let store = InMemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.ttl("k").is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_keeps_first_retention() {
        let store = InMemoryStore::new();
        let handle = store.register_increment_script().await.unwrap();
        let retention = Some(Duration::from_secs(3600));

        assert_eq!(store.increment_with_script(&handle, "c", 1, retention).await.unwrap(), 1);
        assert_eq!(store.increment_with_script(&handle, "c", 2, None).await.unwrap(), 3);
        assert_eq!(store.get("c").await.unwrap().as_deref(), Some("3"));
        assert!(store.ttl("c").is_some());
    }

    #[tokio::test]
    async fn test_increment_rejects_non_numeric_value() {
        let store = InMemoryStore::new();
        let handle = store.register_increment_script().await.unwrap();
        store.set("c", "not-a-number", None).await.unwrap();

        let err = store
            .increment_with_script(&handle, "c", 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = InMemoryStore::new();
        store.close().await.unwrap();
        assert!(matches!(store.get("k").await, Err(StoreError::Closed)));
        assert!(matches!(store.ping().await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_is_rejected() {
        let store = InMemoryStore::new();
        let huge = Duration::from_secs(u64::MAX);

        let err = store.set("k", "v", Some(huge)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidValue { .. }));
        assert_eq!(store.get("k").await.unwrap(), None);

        let handle = store.register_increment_script().await.unwrap();
        let err = store
            .increment_with_script(&handle, "c", 1, Some(huge))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidValue { .. }));
        assert_eq!(store.get("c").await.unwrap(), None);
    }
}
