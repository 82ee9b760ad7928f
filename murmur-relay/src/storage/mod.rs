//! Storage layer for murmur-relay.
//!
//! Every routed message is persisted before any live push is attempted, so
//! the durable store is the delivery guarantee of last resort. Public keys
//! are stored here too, keyed by user.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use murmur_types::{MessageId, UserId};
use serde::Serialize;

/// A persisted direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    /// Store-assigned identifier.
    pub id: MessageId,
    /// Originating user.
    pub sender_id: UserId,
    /// Intended recipient.
    pub receiver_id: UserId,
    /// Opaque content (an encrypted envelope when sent through the proxy).
    pub content: String,
    /// Whether the recipient marked it read.
    pub is_read: bool,
    /// Unix timestamp (seconds) when the message was saved.
    pub created_at: i64,
}

/// Durable message storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and return its durable id.
    async fn save(
        &self,
        sender: UserId,
        receiver: UserId,
        content: &str,
    ) -> Result<MessageId, StorageError>;

    /// Unread messages addressed to `user`, oldest first.
    async fn fetch_unread(&self, user: UserId) -> Result<Vec<StoredMessage>, StorageError>;

    /// Mark a message read.
    ///
    /// Returns `false` if no message has that id.
    async fn mark_read(&self, id: MessageId) -> Result<bool, StorageError>;

    /// Most recent messages exchanged between `a` and `b`, newest first.
    async fn conversation(
        &self,
        a: UserId,
        b: UserId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, StorageError>;
}

/// Durable public-key storage.
#[async_trait]
pub trait PublicKeyStore: Send + Sync {
    /// The public key registered for `user`, if any.
    async fn get(&self, user: UserId) -> Result<Option<String>, StorageError>;

    /// Register or replace the public key for `user`.
    async fn put(&self, user: UserId, public_key: &str) -> Result<(), StorageError>;
}
