//! Public-key lookup for message recipients.
//!
//! The proxy resolves a receiver's public key before sealing each outbound
//! message. [`HttpKeyDirectory`] asks the relay's key API with the session's
//! bearer token; [`MemoryKeyDirectory`] serves tests and embedders.

use crate::crypto::{CryptoError, PublicKey};
use async_trait::async_trait;
use murmur_types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Key lookup errors.
#[derive(Debug, Error)]
pub enum KeyLookupError {
    /// The user has not published a key.
    #[error("no public key for user {0}")]
    NotFound(UserId),

    /// The published key is not a valid P-256 point.
    #[error("published key is invalid: {0}")]
    InvalidKey(#[from] CryptoError),

    /// The directory could not be reached or answered unexpectedly.
    #[error("key request failed: {0}")]
    Request(String),
}

/// Source of recipients' public keys.
#[async_trait]
pub trait PublicKeyDirectory: Send + Sync {
    /// Resolve the public key of `user`.
    async fn get(&self, user: UserId) -> Result<PublicKey, KeyLookupError>;
}

/// Wire shape of the relay's key endpoints.
#[derive(Debug, Serialize, Deserialize)]
struct KeyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<UserId>,
    public_key: String,
}

/// Directory backed by the relay's `/api/keys` endpoints.
#[derive(Clone)]
pub struct HttpKeyDirectory {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for HttpKeyDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpKeyDirectory")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl HttpKeyDirectory {
    /// Create a directory for `base_url` (e.g. `http://localhost:8080`)
    /// that authenticates with `token`.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, KeyLookupError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KeyLookupError::Request(e.to_string()))?;
        Ok(Self::with_client(client, base_url, token))
    }

    /// Create a directory sharing an existing HTTP client.
    pub fn with_client(
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

    /// Upload `key` as the caller's public key.
    pub async fn publish(&self, key: &PublicKey) -> Result<(), KeyLookupError> {
        let body = KeyRecord {
            user_id: None,
            public_key: key.to_base64(),
        };
        let response = self
            .client
            .post(format!("{}/api/keys/upload", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| KeyLookupError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(KeyLookupError::Request(format!(
                "upload answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PublicKeyDirectory for HttpKeyDirectory {
    async fn get(&self, user: UserId) -> Result<PublicKey, KeyLookupError> {
        let response = self
            .client
            .get(format!("{}/api/keys/{}", self.base_url, user))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| KeyLookupError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(KeyLookupError::NotFound(user));
        }
        if !status.is_success() {
            return Err(KeyLookupError::Request(format!("lookup answered {}", status)));
        }

        let record: KeyRecord = response
            .json()
            .await
            .map_err(|e| KeyLookupError::Request(e.to_string()))?;
        Ok(PublicKey::from_base64(&record.public_key)?)
    }
}

/// In-process key directory.
#[derive(Debug, Default)]
pub struct MemoryKeyDirectory {
    keys: RwLock<HashMap<UserId, PublicKey>>,
}

impl MemoryKeyDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `key` for `user`, replacing any previous key.
    pub fn insert(&self, user: UserId, key: PublicKey) {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user, key);
    }
}

#[async_trait]
impl PublicKeyDirectory for MemoryKeyDirectory {
    async fn get(&self, user: UserId) -> Result<PublicKey, KeyLookupError> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user)
            .cloned()
            .ok_or(KeyLookupError::NotFound(user))
    }
}
