//! Health check endpoint.
//!
//! Reports `degraded` with a 503 when the message store stops answering,
//! since the relay then refuses every message it is sent.

use crate::server::RelayServer;
use axum::{http::StatusCode, Extension, Json};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `ok` or `degraded`.
    pub status: &'static str,
    /// Server version.
    pub version: &'static str,
    /// `ok` or `unavailable`.
    pub storage: &'static str,
    /// Users with a live connection.
    pub online_users: usize,
    /// Messages persisted since startup.
    pub messages_routed: u64,
    /// Live pushes lost to a full outbound queue.
    pub live_pushes_dropped: u64,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

impl HealthStatus {
    fn collect(relay: &RelayServer, storage_ok: bool) -> Self {
        let metrics = relay.metrics();
        Self {
            status: if storage_ok { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            storage: if storage_ok { "ok" } else { "unavailable" },
            online_users: relay.registry().len(),
            messages_routed: metrics.messages_routed.load(Ordering::Relaxed),
            live_pushes_dropped: metrics.live_pushes_dropped.load(Ordering::Relaxed),
            uptime_seconds: START_TIME
                .get()
                .map(|start| start.elapsed().as_secs())
                .unwrap_or(0),
        }
    }
}

/// Health check handler.
pub async fn health_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
) -> (StatusCode, Json<HealthStatus>) {
    let storage_ok = match relay.storage().ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Health check: storage unreachable: {}", e);
            false
        }
    };

    let status = if storage_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(HealthStatus::collect(&relay, storage_ok)))
}
