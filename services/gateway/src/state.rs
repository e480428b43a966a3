use std::sync::Arc;

use leaderboard::broadcast::{BroadcasterConfig, FanoutBroadcaster};
use leaderboard::cache::SnapshotCache;
use leaderboard::metrics::ServiceMetrics;
use leaderboard::pipeline::{PipelineConfig, ScoreStore, UpdatePipeline};
use leaderboard::ranking::RankingStore;
use leaderboard::registry::{ConnectionRegistry, RegistryConfig};
use leaderboard::views::{LeaderboardReader, ReaderConfig};
use types::ids::CategoryId;

use crate::auth::TokenResolver;
use crate::rate_limit::RateLimiter;

/// Gateway tunables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Per-connection outbound queue depth; a full queue means the
    /// client is lagging and events are skipped for it.
    pub outbound_queue_capacity: usize,
    /// Rows in the initial window pushed on connect/subscribe.
    pub initial_window: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 256,
            initial_window: 100,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub ranking: Arc<RankingStore>,
    pub pipeline: Arc<UpdatePipeline>,
    pub reader: Arc<LeaderboardReader>,
    pub metrics: Arc<ServiceMetrics>,
    pub rate_limiter: Arc<RateLimiter>,
    pub token_resolver: Arc<dyn TokenResolver>,
    pub config: GatewayConfig,
}

impl AppState {
    /// Wire the full core around a durable-store collaborator.
    pub fn new(
        store: Arc<dyn ScoreStore>,
        categories: Vec<CategoryId>,
        token_resolver: Arc<dyn TokenResolver>,
        config: GatewayConfig,
    ) -> Self {
        let metrics = Arc::new(ServiceMetrics::new());
        let ranking = Arc::new(RankingStore::new(categories));
        let cache = Arc::new(SnapshotCache::new(Arc::clone(&metrics)));
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig::default()));
        let broadcaster = Arc::new(FanoutBroadcaster::new(
            Arc::clone(&registry),
            Arc::clone(&metrics),
            BroadcasterConfig::default(),
        ));
        let pipeline = Arc::new(UpdatePipeline::new(
            store,
            Arc::clone(&ranking),
            Arc::clone(&cache),
            broadcaster,
            Arc::clone(&metrics),
            PipelineConfig::default(),
        ));
        let reader = Arc::new(LeaderboardReader::new(
            Arc::clone(&ranking),
            Arc::clone(&cache),
            ReaderConfig::default(),
        ));

        Self {
            registry,
            ranking,
            pipeline,
            reader,
            metrics,
            rate_limiter: Arc::new(RateLimiter::default()),
            token_resolver,
            config,
        }
    }
}
