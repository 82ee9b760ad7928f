//! WebSocket upgrade endpoint.
//!
//! The bearer credential is checked before the upgrade completes, so a bad
//! token yields a plain 401 and no socket is ever opened.

use super::api::{ApiError, TokenQuery};
use crate::auth::bearer_credential;
use crate::server::RelayServer;
use crate::session::RelaySession;
use axum::{
    extract::{ws::WebSocketUpgrade, Query},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Extension,
};
use murmur_types::transport::axum_ws;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// `GET /api/ws`
pub async fn ws_handler(
    Extension(relay): Extension<Arc<RelayServer>>,
    headers: HeaderMap,
    query: Option<Query<TokenQuery>>,
    upgrade: Result<WebSocketUpgrade, axum::extract::ws::rejection::WebSocketUpgradeRejection>,
) -> Response {
    let query_token = query.as_ref().and_then(|Query(q)| q.token.as_deref());
    let credential = bearer_credential(&headers, query_token);

    let mut session = RelaySession::new(relay.clone());
    let user = match session.authenticate(credential.as_deref()) {
        Ok(user) => user,
        Err(e) => {
            tracing::debug!("WebSocket upgrade refused: {}", e);
            let message = if credential.is_none() {
                "Authorization token required"
            } else {
                "Invalid token"
            };
            return ApiError::Unauthorized(message).into_response();
        }
    };

    // A reconnect replaces the user's existing entry, so it never grows the registry.
    if relay.at_capacity() && relay.registry().lookup(user).is_none() {
        relay
            .metrics()
            .connections_rejected
            .fetch_add(1, Ordering::Relaxed);
        tracing::warn!("Refusing user {}: connection limit reached", user);
        return ApiError::Unavailable.into_response();
    }

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    upgrade.on_upgrade(move |socket| async move {
        let (reader, writer) = axum_ws::split(socket);
        if let Err(e) = session.run(reader, writer).await {
            tracing::debug!("Session for user {} ended: {}", user, e);
        }
    })
}

#[cfg(test)]
mod tests {
    use crate::auth::JwtValidator;
    use crate::config::Config;
    use crate::http::build_router;
    use crate::registry::Connection;
    use crate::server::RelayServer;
    use crate::storage::SqliteStorage;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use murmur_types::UserId;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::util::ServiceExt;

    async fn relay(max_connections: usize) -> Arc<RelayServer> {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let mut config = Config::with_secret("ws-secret");
        config.limits.max_connections = max_connections;
        Arc::new(RelayServer::new(config, storage))
    }

    fn token(user: i64) -> String {
        JwtValidator::new("ws-secret")
            .issue(UserId::new(user), Duration::from_secs(60))
            .unwrap()
    }

    #[tokio::test]
    async fn upgrade_without_token_is_401() {
        let app = build_router(relay(10).await);
        let response = app
            .oneshot(Request::builder().uri("/api/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn upgrade_with_bad_token_is_401() {
        let app = build_router(relay(10).await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/ws?token=garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn upgrade_at_capacity_is_503() {
        let relay = relay(1).await;
        let (handle, _queue) = Connection::open(UserId::new(9), 4).into_parts();
        relay.registry().register(handle);

        let app = build_router(relay);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/ws")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token(1)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn valid_token_without_upgrade_headers_is_rejected() {
        let app = build_router(relay(10).await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/ws?token={}", token(1)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.status().is_client_error());
    }
}
