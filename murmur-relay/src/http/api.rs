//! Authenticated REST API: presence, public keys, and stored messages.

use crate::auth::bearer_credential;
use crate::server::RelayServer;
use crate::session::{MESSAGE_TOO_LARGE, RATE_LIMITED};
use crate::storage::{MessageStore, PublicKeyStore, StoredMessage};
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use murmur_types::{MessageId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Default page size for conversation history.
pub const DEFAULT_CONVERSATION_LIMIT: u32 = 50;
/// Largest page size a caller may request.
pub const MAX_CONVERSATION_LIMIT: u32 = 200;

/// API error responses, rendered as `{ "error": "..." }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or invalid bearer credential.
    #[error("{0}")]
    Unauthorized(&'static str),
    /// Request body or parameters are invalid.
    #[error("{0}")]
    BadRequest(&'static str),
    /// The resource does not exist.
    #[error("{0}")]
    NotFound(&'static str),
    /// The caller exceeded its message rate.
    #[error("{0}")]
    TooManyRequests(&'static str),
    /// The relay is at its connection cap.
    #[error("Server at capacity")]
    Unavailable,
    /// Storage failed.
    #[error("{0}")]
    Internal(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// `token` query parameter accepted in place of the Authorization header.
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    /// Bearer token.
    pub token: Option<String>,
}

/// The authenticated caller of an API route.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(relay) = Extension::<Arc<RelayServer>>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::Internal("relay state missing"))?;

        let query = Query::<TokenQuery>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default();

        let token = bearer_credential(&parts.headers, query.token.as_deref())
            .ok_or(ApiError::Unauthorized("Authorization token required"))?;

        relay
            .validator()
            .validate(&token)
            .map(AuthUser)
            .map_err(|e| {
                tracing::debug!("API credential rejected: {}", e);
                ApiError::Unauthorized("Invalid token")
            })
    }
}

/// `GET /api/users/online`
pub async fn online_users(
    _caller: AuthUser,
    Extension(relay): Extension<Arc<RelayServer>>,
) -> Json<serde_json::Value> {
    Json(json!({ "online_users": relay.registry().list_online() }))
}

/// Public key lookup response.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    /// Key owner.
    pub user_id: UserId,
    /// Base64 public key.
    pub public_key: String,
}

/// `GET /api/keys/:user_id`
pub async fn get_key(
    _caller: AuthUser,
    Extension(relay): Extension<Arc<RelayServer>>,
    Path(user_id): Path<i64>,
) -> Result<Json<PublicKeyResponse>, ApiError> {
    let user_id = UserId::new(user_id);
    match PublicKeyStore::get(relay.storage(), user_id).await {
        Ok(Some(public_key)) => Ok(Json(PublicKeyResponse {
            user_id,
            public_key,
        })),
        Ok(None) => Err(ApiError::NotFound("Public key not found")),
        Err(e) => {
            tracing::warn!("Key lookup for user {} failed: {}", user_id, e);
            Err(ApiError::Internal("Failed to get public key"))
        }
    }
}

/// Body of `POST /api/keys/upload`.
#[derive(Debug, Deserialize)]
pub struct UploadKeyRequest {
    /// Base64 public key.
    pub public_key: String,
}

/// `POST /api/keys/upload`
pub async fn upload_key(
    AuthUser(caller): AuthUser,
    Extension(relay): Extension<Arc<RelayServer>>,
    Json(body): Json<UploadKeyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let public_key = body.public_key.trim();
    if public_key.is_empty() {
        return Err(ApiError::BadRequest("public_key is required"));
    }

    relay
        .storage()
        .put(caller, public_key)
        .await
        .map_err(|e| {
            tracing::warn!("Key upload for user {} failed: {}", caller, e);
            ApiError::Internal("Failed to save public key")
        })?;

    tracing::info!("User {} uploaded a public key", caller);
    Ok(Json(json!({ "message": "Public key uploaded successfully" })))
}

/// Stored messages response.
#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    /// Messages in the order the query defines.
    pub messages: Vec<StoredMessage>,
}

/// `GET /api/messages/unread`
pub async fn unread_messages(
    AuthUser(caller): AuthUser,
    Extension(relay): Extension<Arc<RelayServer>>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let messages = relay.storage().fetch_unread(caller).await.map_err(|e| {
        tracing::warn!("Unread fetch for user {} failed: {}", caller, e);
        ApiError::Internal("Failed to get unread messages")
    })?;
    Ok(Json(MessagesResponse { messages }))
}

/// Body of `POST /api/messages/send`.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Recipient.
    pub receiver_id: Option<UserId>,
    /// Sealed envelope, stored as given.
    pub content: Option<String>,
}

/// Response of `POST /api/messages/send`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    /// Id assigned by the store.
    pub message_id: MessageId,
    /// Always `"sent"`.
    pub status: String,
}

/// `POST /api/messages/send`
///
/// Same path as a WebSocket `message` frame: persisted first, then pushed to
/// the receiver if online.
pub async fn send_message(
    AuthUser(caller): AuthUser,
    Extension(relay): Extension<Arc<RelayServer>>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let Json(body) = body.map_err(|e| {
        tracing::debug!("Rejecting send from user {}: {}", caller, e);
        ApiError::BadRequest("Invalid request")
    })?;
    let content = body.content.filter(|c| !c.is_empty());
    let (Some(receiver), Some(content)) = (body.receiver_id, content) else {
        return Err(ApiError::BadRequest("receiver_id and content are required"));
    };

    if content.len() > relay.config().limits.max_content_bytes {
        return Err(ApiError::BadRequest(MESSAGE_TOO_LARGE));
    }
    if let Err(e) = relay.rate_limits().check_message(caller) {
        relay
            .metrics()
            .rate_limit_hits
            .fetch_add(1, Ordering::Relaxed);
        tracing::warn!("User {} rate limited: {}", caller, e);
        return Err(ApiError::TooManyRequests(RATE_LIMITED));
    }

    let outcome = relay
        .router()
        .route(caller, receiver, content)
        .await
        .map_err(|e| {
            relay
                .metrics()
                .persistence_failures
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Failed to route message from user {}: {}", caller, e);
            ApiError::Internal("Failed to send message")
        })?;
    relay.metrics().record_delivery(&outcome);

    Ok(Json(SendMessageResponse {
        message_id: outcome.message_id,
        status: "sent".to_string(),
    }))
}

/// `POST /api/messages/:id/read`
pub async fn mark_read(
    _caller: AuthUser,
    Extension(relay): Extension<Arc<RelayServer>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let updated = relay
        .storage()
        .mark_read(MessageId::new(id))
        .await
        .map_err(|e| {
            tracing::warn!("Mark-read of {} failed: {}", id, e);
            ApiError::Internal("Failed to mark message as read")
        })?;

    if !updated {
        return Err(ApiError::NotFound("Message not found"));
    }
    Ok(Json(json!({ "message": "Message marked as read" })))
}

/// `limit` query parameter of the conversation route.
#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    /// Page size, clamped to [`MAX_CONVERSATION_LIMIT`].
    pub limit: Option<u32>,
}

/// `GET /api/messages/conversation/:peer_id`
pub async fn conversation(
    AuthUser(caller): AuthUser,
    Extension(relay): Extension<Arc<RelayServer>>,
    Path(peer_id): Path<i64>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let limit = clamp_limit(query.limit);
    let messages = relay
        .storage()
        .conversation(caller, UserId::new(peer_id), limit)
        .await
        .map_err(|e| {
            tracing::warn!("Conversation fetch for user {} failed: {}", caller, e);
            ApiError::Internal("Failed to get conversation")
        })?;
    Ok(Json(MessagesResponse { messages }))
}

fn clamp_limit(limit: Option<u32>) -> u32 {
    match limit {
        None | Some(0) => DEFAULT_CONVERSATION_LIMIT,
        Some(n) => n.min(MAX_CONVERSATION_LIMIT),
    }
}
