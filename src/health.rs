use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use std::time::{Instant, SystemTime};

use crate::store::KeyValueStore;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub store: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub backend: String,
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

static START_TIME: LazyLock<SystemTime> = LazyLock::new(SystemTime::now);

#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn KeyValueStore>,
    backend: &'static str,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn KeyValueStore>, backend: &'static str) -> Self {
        LazyLock::force(&START_TIME);
        Self { store, backend }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let now = SystemTime::now();
        let uptime = now.duration_since(*START_TIME).unwrap_or_default().as_secs();

        let store_status = self.check_store().await;

        // Without the store neither counters nor cache work.
        let overall_status = if store_status.status == "healthy" {
            "healthy"
        } else {
            "unhealthy"
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: now
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            dependencies: DependencyStatus {
                store: store_status,
            },
        }
    }

    async fn check_store(&self) -> ServiceStatus {
        let start = Instant::now();
        let result = self.store.ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => ServiceStatus {
                backend: self.backend.to_string(),
                status: "healthy".to_string(),
                response_time_ms,
                error: None,
            },
            Err(e) => ServiceStatus {
                backend: self.backend.to_string(),
                status: "unavailable".to_string(),
                response_time_ms,
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn test_healthy_store() {
        let checker = HealthChecker::new(Arc::new(InMemoryStore::new()), "memory");
        let status = checker.check_health().await;
        assert_eq!(status.status, "healthy");
        assert_eq!(status.dependencies.store.backend, "memory");
        assert!(status.dependencies.store.error.is_none());
    }

    #[tokio::test]
    async fn test_closed_store_is_unhealthy() {
        let store = InMemoryStore::new();
        store.close().await.unwrap();
        let checker = HealthChecker::new(Arc::new(store), "memory");

        let status = checker.check_health().await;
        assert_eq!(status.status, "unhealthy");
        assert_eq!(status.dependencies.store.status, "unavailable");

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("store has been closed"));
    }
}
