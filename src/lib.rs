pub mod cache;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod features;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod keys;
pub mod metrics;
pub mod middleware;
pub mod quota;
pub mod server;
pub mod store;
pub mod usage;

pub use cache::CacheAside;
pub use config::{Config, GatewayFile};
pub use error::{GatewayError, GatewayResult, StoreError, UpstreamError};
pub use gateway::{
    Feature, FeatureSettings, GatewayContext, ProviderAdapter, ProviderGateway, ProviderRoute,
    QuotaMode,
};
pub use keys::{Action, Provider, UsageKey};
pub use quota::{QuotaGate, QuotaPolicy, QuotaTable};
pub use server::create_app;
pub use store::{InMemoryStore, KeyValueStore, RedisStore};
pub use usage::UsageCounter;
