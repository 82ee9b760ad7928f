//! Local HTTP endpoints for murmur-proxy.
//!
//! `GET /api/ws` upgrades the UI connection after the relay has accepted the
//! upstream dial, so a UI never holds a socket with nothing behind it. The
//! REST routes forward to the relay, sealing and opening content on the way.

use crate::api::{RelayApi, RelayApiError, RelayMessage};
use crate::config::ProxyConfig;
use crate::crypto::{self, KeyPair, PrivateKey};
use crate::directory::HttpKeyDirectory;
use crate::proxy::ClientRelayProxy;
use crate::ws::connect_upstream;
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Query,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use murmur_types::transport::axum_ws;
use murmur_types::UserId;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Header carrying the user's base64 private key.
pub const PRIVATE_KEY_HEADER: &str = "x-private-key";

/// Shared state of the proxy's HTTP surface.
#[derive(Debug)]
pub struct ProxyState {
    config: ProxyConfig,
    http: reqwest::Client,
}

impl ProxyState {
    /// Create the state, building the HTTP client used toward the relay.
    pub fn new(config: ProxyConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { config, http })
    }

    /// Get the proxy configuration.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    fn directory(&self, token: &str) -> HttpKeyDirectory {
        HttpKeyDirectory::with_client(self.http.clone(), self.config.server_url.clone(), token)
    }

    fn relay_api(&self, token: &str) -> RelayApi {
        RelayApi::new(self.http.clone(), self.config.server_url.clone(), token)
    }
}

/// Build the proxy router.
pub fn build_router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/api/messages/unread", get(unread_handler))
        .route("/api/messages/send", post(send_handler))
        .route("/api/keys/generate", post(generate_keys_handler))
        .route("/health", get(health_handler))
        .layer(Extension(state))
}

/// Credentials accepted as query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ProxyQuery {
    /// Bearer token for the relay.
    pub token: Option<String>,
    /// Base64 private key for opening inbound messages.
    #[serde(alias = "privateKey")]
    pub private_key: Option<String>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn bearer_token(headers: &HeaderMap, query: &ProxyQuery) -> Option<String> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    non_empty(header).or_else(|| non_empty(query.token.as_deref()))
}

fn private_key_text(headers: &HeaderMap, query: &ProxyQuery) -> Option<String> {
    let header = headers
        .get(PRIVATE_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    non_empty(header).or_else(|| non_empty(query.private_key.as_deref()))
}

/// Parse the optional private key, rejecting one that is present but invalid.
fn parse_private_key(
    headers: &HeaderMap,
    query: &ProxyQuery,
) -> Result<Option<PrivateKey>, Response> {
    let Some(text) = private_key_text(headers, query) else {
        return Ok(None);
    };
    PrivateKey::from_base64(&text).map(Some).map_err(|e| {
        tracing::warn!("Rejecting request: {}", e);
        error_response(StatusCode::BAD_REQUEST, "Invalid private key")
    })
}

fn relay_error_response(error: RelayApiError) -> Response {
    match error {
        RelayApiError::Request(e) => {
            tracing::warn!("Relay unreachable: {}", e);
            error_response(StatusCode::BAD_GATEWAY, "Failed to connect to server")
        }
        RelayApiError::Status { status, message } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            let message = if message.is_empty() {
                "Relay request failed"
            } else {
                message.as_str()
            };
            error_response(status, message)
        }
    }
}

/// `GET /api/ws` (also served at `/ws`)
pub async fn ws_handler(
    Extension(state): Extension<Arc<ProxyState>>,
    headers: HeaderMap,
    query: Option<Query<ProxyQuery>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let query = query.map(|Query(q)| q).unwrap_or_default();

    let Some(token) = bearer_token(&headers, &query) else {
        return error_response(StatusCode::UNAUTHORIZED, "Missing token");
    };

    let private_key = match parse_private_key(&headers, &query) {
        Ok(key) => key,
        Err(response) => return response,
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let upstream = match connect_upstream(&state.config.server_url, &token).await {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::warn!("Upstream dial failed: {}", e);
            return error_response(StatusCode::BAD_GATEWAY, "Failed to connect to server");
        }
    };

    let mut proxy = ClientRelayProxy::new(Arc::new(state.directory(&token)));
    if let Some(key) = private_key {
        proxy = proxy.with_private_key(key);
    }

    upgrade.on_upgrade(move |socket| async move {
        tracing::info!("UI connection established");
        if let Err(e) = proxy.run(axum_ws::split(socket), upstream).await {
            tracing::debug!("Proxy session ended: {}", e);
        }
        tracing::info!("UI connection closed");
    })
}

/// Unread messages, opened where the key allows.
#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    /// Messages oldest first.
    pub messages: Vec<RelayMessage>,
}

/// `GET /api/messages/unread`
///
/// Content that cannot be opened with the caller's key is returned as the
/// relay stored it.
pub async fn unread_handler(
    Extension(state): Extension<Arc<ProxyState>>,
    headers: HeaderMap,
    query: Option<Query<ProxyQuery>>,
) -> Response {
    let query = query.map(|Query(q)| q).unwrap_or_default();

    let Some(token) = bearer_token(&headers, &query) else {
        return error_response(StatusCode::UNAUTHORIZED, "Missing token");
    };
    let private_key = match parse_private_key(&headers, &query) {
        Ok(key) => key,
        Err(response) => return response,
    };

    let mut messages = match state.relay_api(&token).unread_messages().await {
        Ok(messages) => messages,
        Err(e) => return relay_error_response(e),
    };

    if let Some(key) = &private_key {
        for message in messages.iter_mut().filter(|m| !m.content.is_empty()) {
            match crypto::open_text(key, &message.content) {
                Ok(plaintext) => message.content = plaintext,
                Err(e) => tracing::warn!("Failed to decrypt message {}: {}", message.id, e),
            }
        }
    }

    Json(UnreadResponse { messages }).into_response()
}

/// Body of `POST /api/messages/send`.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    /// Recipient.
    pub receiver_id: Option<UserId>,
    /// Plaintext to seal.
    pub content: Option<String>,
}

/// `POST /api/messages/send`
pub async fn send_handler(
    Extension(state): Extension<Arc<ProxyState>>,
    headers: HeaderMap,
    query: Option<Query<ProxyQuery>>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Response {
    let query = query.map(|Query(q)| q).unwrap_or_default();

    let Some(token) = bearer_token(&headers, &query) else {
        return error_response(StatusCode::UNAUTHORIZED, "Missing token");
    };
    let (receiver, content) = match body {
        Ok(Json(SendRequest {
            receiver_id: Some(receiver),
            content: Some(content),
        })) if !content.is_empty() => (receiver, content),
        _ => return error_response(StatusCode::BAD_REQUEST, "Invalid request"),
    };

    let proxy = ClientRelayProxy::new(Arc::new(state.directory(&token)));
    let envelope = match proxy.seal_for(receiver, &content).await {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!("Not sending message to {}: {}", receiver, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.user_message());
        }
    };

    match state.relay_api(&token).send_message(receiver, &envelope).await {
        Ok(receipt) => Json(receipt).into_response(),
        Err(e) => relay_error_response(e),
    }
}

/// Response of `POST /api/keys/generate`.
#[derive(Debug, Serialize)]
pub struct GeneratedKeys {
    /// Base64 SEC1 public key, now published on the relay.
    pub public_key: String,
    /// Base64 private scalar. Only ever returned to the caller.
    pub private_key: String,
}

/// `POST /api/keys/generate`
pub async fn generate_keys_handler(
    Extension(state): Extension<Arc<ProxyState>>,
    headers: HeaderMap,
    query: Option<Query<ProxyQuery>>,
) -> Response {
    let query = query.map(|Query(q)| q).unwrap_or_default();

    let Some(token) = bearer_token(&headers, &query) else {
        return error_response(StatusCode::UNAUTHORIZED, "Missing token");
    };

    let keys = match KeyPair::generate() {
        Ok(keys) => keys,
        Err(e) => {
            tracing::error!("Key generation failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate keys");
        }
    };

    if let Err(e) = state.directory(&token).publish(&keys.public).await {
        tracing::warn!("Public key upload failed: {}", e);
        return error_response(StatusCode::BAD_GATEWAY, "Failed to upload public key");
    }

    tracing::info!("Generated and published a new key pair");
    Json(GeneratedKeys {
        public_key: keys.public.to_base64(),
        private_key: keys.private.to_base64().as_str().to_string(),
    })
    .into_response()
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Proxy version.
    pub version: String,
    /// Relay the proxy dials.
    pub server_url: String,
}

/// `GET /health`
pub async fn health_handler(Extension(state): Extension<Arc<ProxyState>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        server_url: state.config.server_url.clone(),
    })
}
