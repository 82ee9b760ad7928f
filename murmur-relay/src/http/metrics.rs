//! Prometheus metrics endpoint.

use crate::server::{RelayMetrics, RelayServer};
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
pub async fn metrics_handler(Extension(relay): Extension<Arc<RelayServer>>) -> impl IntoResponse {
    let body = render(relay.registry().len(), relay.metrics());
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

fn render(online: usize, m: &RelayMetrics) -> String {
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let conns_rejected = m.connections_rejected.load(Ordering::Relaxed);
    let routed = m.messages_routed.load(Ordering::Relaxed);
    let queued = m.live_pushes_queued.load(Ordering::Relaxed);
    let dropped = m.live_pushes_dropped.load(Ordering::Relaxed);
    let save_failures = m.persistence_failures.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let malformed = m.malformed_frames.load(Ordering::Relaxed);

    format!(
        r#"# HELP murmur_relay_online_users Users with a live connection
# TYPE murmur_relay_online_users gauge
murmur_relay_online_users {online}

# HELP murmur_relay_info Server information
# TYPE murmur_relay_info gauge
murmur_relay_info{{version="{version}"}} 1

# HELP murmur_relay_connections_total Sessions that passed authentication
# TYPE murmur_relay_connections_total counter
murmur_relay_connections_total {conns_total}

# HELP murmur_relay_connections_rejected_total Upgrades refused
# TYPE murmur_relay_connections_rejected_total counter
murmur_relay_connections_rejected_total {conns_rejected}

# HELP murmur_relay_messages_routed_total Messages persisted
# TYPE murmur_relay_messages_routed_total counter
murmur_relay_messages_routed_total {routed}

# HELP murmur_relay_live_pushes_queued_total Live pushes queued for an online receiver
# TYPE murmur_relay_live_pushes_queued_total counter
murmur_relay_live_pushes_queued_total {queued}

# HELP murmur_relay_live_pushes_dropped_total Live pushes dropped on a full or closing queue
# TYPE murmur_relay_live_pushes_dropped_total counter
murmur_relay_live_pushes_dropped_total {dropped}

# HELP murmur_relay_persistence_failures_total Messages the store failed to save
# TYPE murmur_relay_persistence_failures_total counter
murmur_relay_persistence_failures_total {save_failures}

# HELP murmur_relay_rate_limit_hits_total Messages refused by rate limiting
# TYPE murmur_relay_rate_limit_hits_total counter
murmur_relay_rate_limit_hits_total {rate_limits}

# HELP murmur_relay_malformed_frames_total Sessions ended by an unparseable frame
# TYPE murmur_relay_malformed_frames_total counter
murmur_relay_malformed_frames_total {malformed}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_gauges_and_counters() {
        let metrics = RelayMetrics::default();
        metrics.messages_routed.fetch_add(7, Ordering::Relaxed);

        let body = render(3, &metrics);
        assert!(body.contains("# TYPE murmur_relay_online_users gauge"));
        assert!(body.contains("murmur_relay_online_users 3\n"));
        assert!(body.contains("murmur_relay_messages_routed_total 7\n"));
    }
}
