//! Client for the relay's message API.
//!
//! Carries sealed envelopes only: callers seal before [`RelayApi::send_message`]
//! and open what [`RelayApi::unread_messages`] returns.

use murmur_types::{MessageId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Relay API errors.
#[derive(Debug, Error)]
pub enum RelayApiError {
    /// The relay could not be reached or sent an unreadable body.
    #[error("relay request failed: {0}")]
    Request(String),

    /// The relay answered with an error status.
    #[error("relay answered {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// The relay's `error` text, if it sent one.
        message: String,
    },
}

/// A stored message as the relay returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Durable id.
    pub id: MessageId,
    /// Author.
    pub sender_id: UserId,
    /// Recipient.
    pub receiver_id: UserId,
    /// Envelope, or plaintext once opened.
    pub content: String,
    /// Whether the recipient marked it read.
    pub is_read: bool,
    /// Unix seconds.
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
struct MessagesBody {
    messages: Vec<RelayMessage>,
}

/// Acknowledgement of `POST /api/messages/send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Id assigned by the relay.
    pub message_id: MessageId,
    /// `"sent"`.
    pub status: String,
}

/// Authenticated handle on the relay's REST API.
#[derive(Clone)]
pub struct RelayApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for RelayApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayApi")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl RelayApi {
    /// Create an API handle sharing `client`.
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Store `envelope` for `receiver` and push it live if they are online.
    pub async fn send_message(
        &self,
        receiver: UserId,
        envelope: &str,
    ) -> Result<SendReceipt, RelayApiError> {
        let response = self
            .client
            .post(format!("{}/api/messages/send", self.base_url))
            .bearer_auth(&self.token)
            .json(&json!({ "receiver_id": receiver, "content": envelope }))
            .send()
            .await
            .map_err(|e| RelayApiError::Request(e.to_string()))?;

        read_json(response).await
    }

    /// Fetch the caller's unread messages, oldest first.
    pub async fn unread_messages(&self) -> Result<Vec<RelayMessage>, RelayApiError> {
        let response = self
            .client
            .get(format!("{}/api/messages/unread", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| RelayApiError::Request(e.to_string()))?;

        let body: MessagesBody = read_json(response).await?;
        Ok(body.messages)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RelayApiError> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|body| body["error"].as_str().map(str::to_string))
            .unwrap_or_default();
        return Err(RelayApiError::Status {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json()
        .await
        .map_err(|e| RelayApiError::Request(e.to_string()))
}
