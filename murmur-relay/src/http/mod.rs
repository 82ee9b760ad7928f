//! HTTP endpoints for murmur-relay.
//!
//! Provides the WebSocket upgrade, the authenticated REST API, health checks
//! and metrics.

pub mod api;
pub mod health;
mod metrics;
pub mod ws;

use crate::server::RelayServer;
use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;

pub use api::{ApiError, AuthUser};
pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<RelayServer>) -> Router {
    health::init_start_time();

    Router::new()
        .route("/api/ws", get(ws::ws_handler))
        .route("/api/users/online", get(api::online_users))
        .route("/api/keys/upload", post(api::upload_key))
        .route("/api/keys/:user_id", get(api::get_key))
        .route("/api/messages/send", post(api::send_message))
        .route("/api/messages/unread", get(api::unread_messages))
        .route("/api/messages/:id/read", post(api::mark_read))
        .route("/api/messages/conversation/:peer_id", get(api::conversation))
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(relay))
}
