use super::{KeyValueStore, ScriptHandle, INCREMENT_SCRIPT};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, ErrorKind, RedisResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Redis-backed store. Cloning shares the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    closed: Arc<AtomicBool>,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            StoreError::Connection(format!("Failed to create Redis client: {}", e))
        })?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!(target: "quota_gateway::store", "connected to redis");
        Ok(Self {
            connection,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn connection(&self) -> StoreResult<ConnectionManager> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(self.connection.clone())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection()?;
        let result: RedisResult<Option<String>> =
            redis::cmd("GET").arg(key).query_async(&mut conn).await;
        result.map_err(|e| StoreError::Command(format!("GET failed: {}", e)))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.connection()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }

        let result: RedisResult<()> = cmd.query_async(&mut conn).await;
        result.map_err(|e| StoreError::Command(format!("SET failed: {}", e)))
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        let result: RedisResult<i64> = redis::cmd("DEL").arg(key).query_async(&mut conn).await;
        result
            .map(|deleted| deleted > 0)
            .map_err(|e| StoreError::Command(format!("DEL failed: {}", e)))
    }

    async fn register_increment_script(&self) -> StoreResult<ScriptHandle> {
        let mut conn = self.connection()?;
        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(INCREMENT_SCRIPT)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(format!("SCRIPT LOAD failed: {}", e)))?;

        tracing::debug!(target: "quota_gateway::store", sha = %sha, "increment script loaded");
        Ok(ScriptHandle {
            sha,
            source: Arc::from(INCREMENT_SCRIPT),
        })
    }

    async fn increment_with_script(
        &self,
        handle: &ScriptHandle,
        key: &str,
        delta: i64,
        retention: Option<Duration>,
    ) -> StoreResult<i64> {
        let mut conn = self.connection()?;
        let retention_secs = retention.map(|r| r.as_secs()).unwrap_or(0);

        let result: RedisResult<i64> = redis::cmd("EVALSHA")
            .arg(&handle.sha)
            .arg(1)
            .arg(key)
            .arg(delta)
            .arg(retention_secs)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(total) => Ok(total),
            // Script cache was flushed (restart or SCRIPT FLUSH); EVAL reloads it.
            Err(e) if e.kind() == ErrorKind::NoScriptError => {
                tracing::warn!(
                    target: "quota_gateway::store",
                    sha = %handle.sha,
                    "increment script missing on server, falling back to EVAL"
                );
                let retry: RedisResult<i64> = redis::cmd("EVAL")
                    .arg(handle.source.as_ref())
                    .arg(1)
                    .arg(key)
                    .arg(delta)
                    .arg(retention_secs)
                    .query_async(&mut conn)
                    .await;
                retry.map_err(|e| StoreError::Command(format!("Script execution failed: {}", e)))
            }
            Err(e) => Err(StoreError::Command(format!(
                "Script execution failed: {}",
                e
            ))),
        }
    }

    async fn ping(&self) -> StoreResult<String> {
        let mut conn = self.connection()?;
        let result: RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        result.map_err(|e| StoreError::Connection(format!("Ping failed: {}", e)))
    }

    async fn close(&self) -> StoreResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!(target: "quota_gateway::store", "redis store closed");
        }
        Ok(())
    }
}
