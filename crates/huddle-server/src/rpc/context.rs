//! RPC dependency-injection context.

use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::exchange::SnapshotExchange;
use crate::membership::{MembershipOracle, MembershipRegistry};
use crate::metadata::MetadataCache;
use crate::presence::PresenceService;
use crate::rate_limit::PublishLimiter;
use crate::reaper::LifecycleReaper;
use crate::websocket::broadcast::BroadcastManager;

/// Shared context passed to every RPC handler.
pub struct RpcContext {
    /// Room/project membership records.
    pub membership: Arc<MembershipRegistry>,
    /// Live connections, for targeted sends.
    pub peers: Arc<BroadcastManager>,
    /// Presence store and broadcaster.
    pub presence: Arc<PresenceService>,
    /// Per-project thread metadata cache.
    pub metadata: Arc<MetadataCache>,
    /// Guest → host snapshot relay.
    pub exchange: Arc<SnapshotExchange>,
    /// Presence publish quota.
    pub limiter: Arc<PublishLimiter>,
    /// Cleanup on leave, unshare, and disconnect.
    pub reaper: Arc<LifecycleReaper>,
    /// When the server started (for uptime calculation).
    pub server_start_time: Instant,
}

impl RpcContext {
    /// Build every service from the server configuration.
    pub fn new(config: &ServerConfig) -> Self {
        let membership = Arc::new(MembershipRegistry::new());
        let oracle = Arc::clone(&membership) as Arc<dyn MembershipOracle>;
        let peers = Arc::new(BroadcastManager::new());
        let limiter = Arc::new(PublishLimiter::new(
            config.publish_burst,
            config.publish_refill_per_sec,
        ));
        let presence = Arc::new(PresenceService::new(
            Arc::clone(&oracle),
            Arc::clone(&peers),
            Arc::clone(&limiter),
        ));
        let metadata = Arc::new(MetadataCache::new(Arc::clone(&oracle), Arc::clone(&peers)));
        let exchange = Arc::new(SnapshotExchange::new(
            oracle,
            Arc::clone(&peers),
            config.relay_timeout(),
        ));
        let reaper = Arc::new(LifecycleReaper::new(
            Arc::clone(&presence),
            Arc::clone(&metadata),
            Arc::clone(&exchange),
            Arc::clone(&limiter),
        ));

        Self {
            membership,
            peers,
            presence,
            metadata,
            exchange,
            limiter,
            reaper,
            server_start_time: Instant::now(),
        }
    }
}
