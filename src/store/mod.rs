//! Key-value store seam shared by the response cache and the usage counters.

mod memory;
mod redis_store;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

use crate::error::StoreResult;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Lua source for the atomic usage increment.
///
/// KEYS[1] counter key, ARGV[1] delta, ARGV[2] retention in seconds (0 = none).
/// The retention TTL is only set when the key has none yet.
pub const INCREMENT_SCRIPT: &str = r#"
local total = redis.call('INCRBY', KEYS[1], tonumber(ARGV[1]))
local retention = tonumber(ARGV[2])
if retention > 0 and redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], retention)
end
return total
"#;

/// Reference to a script registered with the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHandle {
    pub sha: String,
    pub source: Arc<str>,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Last writer wins. `ttl = None` keeps the value until deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    async fn del(&self, key: &str) -> StoreResult<bool>;

    /// Registers [`INCREMENT_SCRIPT`] and returns its handle.
    async fn register_increment_script(&self) -> StoreResult<ScriptHandle>;

    /// Adds `delta` to the counter under `key` in one server-side step and
    /// returns the new total.
    async fn increment_with_script(
        &self,
        handle: &ScriptHandle,
        key: &str,
        delta: i64,
        retention: Option<Duration>,
    ) -> StoreResult<i64>;

    async fn ping(&self) -> StoreResult<String>;

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}
