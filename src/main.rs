use anyhow::Result;
use clap::Parser;
use quota_gateway::config::{Config, GatewayFile};
use quota_gateway::config_validator::ConfigValidator;
use quota_gateway::features::{Geocoding, MatrixRouting, PoiSearch};
use quota_gateway::gateway::{Feature, FeatureSettings, GatewayContext};
use quota_gateway::handlers::AppState;
use quota_gateway::metrics::GatewayMetrics;
use quota_gateway::quota::QuotaGate;
use quota_gateway::server::Server;
use quota_gateway::store::{InMemoryStore, KeyValueStore, RedisStore};
use quota_gateway::usage::UsageCounter;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "quota-gateway", version, about = "Quota-gated provider gateway operations service")]
struct Cli {
    /// Overrides BIND_ADDR
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Overrides GATEWAY_CONFIG
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(path) = cli.config {
        config.gateway_config = Some(path.display().to_string());
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("quota_gateway={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    ConfigValidator::validate_config(&config)?;

    let gateway_file = match &config.gateway_config {
        Some(path) => GatewayFile::load(path)?,
        None => {
            tracing::warn!("GATEWAY_CONFIG not set, every provider is unlimited");
            GatewayFile::default()
        }
    };
    ConfigValidator::validate_gateway_file(&gateway_file)?;

    tracing::info!("Starting quota gateway");
    tracing::info!(
        "Configuration: bind_addr={}, store={}, quota_rules={}",
        config.bind_addr,
        if config.uses_redis() { "redis" } else { "memory" },
        gateway_file.quotas.rules.len()
    );

    let (store, backend): (Arc<dyn KeyValueStore>, &'static str) = if config.uses_redis() {
        (Arc::new(RedisStore::connect(&config.redis_url).await?), "redis")
    } else {
        (Arc::new(InMemoryStore::new()), "memory")
    };

    // Without the increment script usage cannot be counted; refuse to start.
    let counter = UsageCounter::init(Arc::clone(&store), config.usage_retention()?).await?;
    let ctx = GatewayContext {
        store: Arc::clone(&store),
        quota: QuotaGate::new(Arc::new(counter), Arc::new(gateway_file.quotas.clone())),
        metrics: GatewayMetrics::new(),
    };

    log_settings::<Geocoding>(&gateway_file.settings_for::<Geocoding>());
    log_settings::<PoiSearch>(&gateway_file.settings_for::<PoiSearch>());
    log_settings::<MatrixRouting>(&gateway_file.settings_for::<MatrixRouting>());

    let state = Arc::new(AppState::from_context(&ctx, backend));

    let served = Server::new(state, config.bind_addr).run().await;

    if let Err(e) = store.close().await {
        tracing::warn!("Failed to close store: {}", e);
    }
    served.map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    tracing::info!("Quota gateway stopped");
    Ok(())
}

fn log_settings<F: Feature>(settings: &FeatureSettings) {
    tracing::info!(
        feature = F::NAME,
        cache_ttl_secs = settings.cache_ttl.as_secs(),
        quota_mode = %settings.quota_mode,
        single_flight = settings.single_flight,
        "feature settings"
    );
}
