//! Main RelayServer coordination.
//!
//! RelayServer owns storage, the connection registry, the message router and
//! the shared limits, and serves the HTTP/WebSocket surface.

use crate::auth::{JwtValidator, TokenValidator};
use crate::config::Config;
use crate::error::RelayError;
use crate::http;
use crate::limits::RateLimits;
use crate::registry::ConnectionRegistry;
use crate::router::{DeliveryOutcome, LiveDelivery, MessageRouter};
use crate::storage::SqliteStorage;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often idle rate-limiter entries are evicted.
const LIMITER_SHRINK_INTERVAL: Duration = Duration::from_secs(300);

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Sessions that passed authentication.
    pub connections_total: AtomicU64,
    /// Upgrades refused for a bad credential or the connection cap.
    pub connections_rejected: AtomicU64,
    /// Messages persisted by the router.
    pub messages_routed: AtomicU64,
    /// Live pushes queued on a receiver's connection.
    pub live_pushes_queued: AtomicU64,
    /// Live pushes dropped (full or closing queue).
    pub live_pushes_dropped: AtomicU64,
    /// Messages the durable store failed to save.
    pub persistence_failures: AtomicU64,
    /// Messages refused by rate limiting.
    pub rate_limit_hits: AtomicU64,
    /// Sessions terminated for an unparseable frame.
    pub malformed_frames: AtomicU64,
}

impl RelayMetrics {
    /// Record a successful route.
    pub fn record_delivery(&self, outcome: &DeliveryOutcome) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
        match outcome.live {
            LiveDelivery::Queued => {
                self.live_pushes_queued.fetch_add(1, Ordering::Relaxed);
            }
            LiveDelivery::Dropped => {
                self.live_pushes_dropped.fetch_add(1, Ordering::Relaxed);
            }
            LiveDelivery::Offline => {}
        }
    }
}

/// Main relay server.
pub struct RelayServer {
    config: Config,
    storage: Arc<SqliteStorage>,
    registry: Arc<ConnectionRegistry>,
    router: MessageRouter,
    validator: Arc<dyn TokenValidator>,
    rate_limits: RateLimits,
    metrics: RelayMetrics,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("online", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl RelayServer {
    /// Create a relay with the given config and storage.
    ///
    /// Bearer tokens are validated as HS256 JWTs signed with
    /// `config.auth.jwt_secret`.
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        let validator = Arc::new(JwtValidator::new(&config.auth.jwt_secret));
        Self::with_validator(config, storage, validator)
    }

    /// Create a relay with a custom token validator.
    pub fn with_validator(
        config: Config,
        storage: SqliteStorage,
        validator: Arc<dyn TokenValidator>,
    ) -> Self {
        let storage = Arc::new(storage);
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(registry.clone(), storage.clone());
        let rate_limits = RateLimits::new(&config.limits);

        Self {
            config,
            storage,
            registry,
            router,
            validator,
            rate_limits,
            metrics: RelayMetrics::default(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the storage layer.
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the message router.
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Get the bearer-token validator.
    pub fn validator(&self) -> &dyn TokenValidator {
        self.validator.as_ref()
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Whether the connection cap is reached.
    pub fn at_capacity(&self) -> bool {
        self.registry.len() >= self.config.limits.max_connections
    }

    /// Bind `server.bind_address` and serve until `shutdown` resolves.
    pub async fn serve(
        self: Arc<Self>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), RelayError> {
        let listener = tokio::net::TcpListener::bind(&self.config.server.bind_address).await?;
        self.serve_with_listener(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    pub async fn serve_with_listener(
        self: Arc<Self>,
        listener: tokio::net::TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), RelayError> {
        tracing::info!("Listening on {}", listener.local_addr()?);

        let limits = self.rate_limits.clone();
        let housekeeping = tokio::spawn(async move {
            let mut interval = tokio::time::interval(LIMITER_SHRINK_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                limits.shrink();
                tracing::debug!("Rate limiter tracks {} users", limits.tracked_users());
            }
        });

        let app = http::build_router(self);
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        housekeeping.abort();
        result.map_err(RelayError::Io)
    }
}
