//! Message routing: persist first, then push if the receiver is online.

use crate::error::RouteError;
use crate::registry::ConnectionRegistry;
use crate::storage::MessageStore;
use chrono::{SecondsFormat, Utc};
use murmur_types::{MessageFrame, MessageId, RelayFrame, UserId};
use std::sync::Arc;

/// What happened on the live path for a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveDelivery {
    /// The frame was queued on the receiver's connection.
    Queued,
    /// The receiver was online but its queue was full or closing.
    Dropped,
    /// The receiver had no live connection.
    Offline,
}

impl LiveDelivery {
    /// Whether the receiver was online when the message was routed.
    pub fn live_push_attempted(&self) -> bool {
        !matches!(self, LiveDelivery::Offline)
    }
}

/// Result of routing one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Durable id assigned by the store.
    pub message_id: MessageId,
    /// Live-path result. Never an error: the store already has the message.
    pub live: LiveDelivery,
}

/// Routes messages to live connections with durable fallback.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn MessageStore>,
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("online", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl MessageRouter {
    /// Create a router over `registry` that persists to `store`.
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn MessageStore>) -> Self {
        Self { registry, store }
    }

    /// Route one message from `sender` to `receiver`.
    ///
    /// The message is saved before the registry is consulted, so it is
    /// retrievable as unread whatever happens on the live path. The live
    /// push never waits for queue capacity.
    pub async fn route(
        &self,
        sender: UserId,
        receiver: UserId,
        content: String,
    ) -> Result<DeliveryOutcome, RouteError> {
        let message_id = self.store.save(sender, receiver, &content).await?;

        let live = match self.registry.lookup(receiver) {
            None => LiveDelivery::Offline,
            Some(handle) => {
                let frame = RelayFrame::Message(MessageFrame {
                    receiver_id: Some(receiver),
                    sender_id: Some(sender),
                    content: Some(content),
                    message_id: Some(message_id),
                    timestamp: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
                });

                match handle.try_push(frame) {
                    Ok(()) => LiveDelivery::Queued,
                    Err(e) => {
                        tracing::debug!(
                            "Live push of {} to user {} dropped ({}), left in store",
                            message_id,
                            receiver,
                            e
                        );
                        LiveDelivery::Dropped
                    }
                }
            }
        };

        tracing::debug!(
            "Routed message {} from {} to {}: {:?}",
            message_id,
            sender,
            receiver,
            live
        );

        Ok(DeliveryOutcome { message_id, live })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::registry::Connection;
    use crate::storage::{SqliteStorage, StoredMessage};
    use async_trait::async_trait;

    const ALICE: UserId = UserId::new(1);
    const BOB: UserId = UserId::new(2);

    async fn setup() -> (Arc<ConnectionRegistry>, Arc<SqliteStorage>, MessageRouter) {
        let registry = Arc::new(ConnectionRegistry::new());
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let router = MessageRouter::new(registry.clone(), storage.clone());
        (registry, storage, router)
    }

    #[tokio::test]
    async fn offline_receiver_gets_durable_copy() {
        let (_registry, storage, router) = setup().await;

        let outcome = router.route(ALICE, BOB, "hello".into()).await.unwrap();
        assert_eq!(outcome.live, LiveDelivery::Offline);
        assert!(!outcome.live.live_push_attempted());

        let unread = storage.fetch_unread(BOB).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, outcome.message_id);
        assert_eq!(unread[0].content, "hello");
    }

    #[tokio::test]
    async fn online_receiver_gets_frame_on_its_queue() {
        let (registry, storage, router) = setup().await;
        let (handle, mut queue) = Connection::open(BOB, 8).into_parts();
        registry.register(handle);

        let outcome = router.route(ALICE, BOB, "hi bob".into()).await.unwrap();
        assert_eq!(outcome.live, LiveDelivery::Queued);

        // Enqueued before route returned
        let frame = queue.recv().await.unwrap();
        let RelayFrame::Message(m) = frame else {
            panic!("expected message frame");
        };
        assert_eq!(m.sender_id, Some(ALICE));
        assert_eq!(m.receiver_id, Some(BOB));
        assert_eq!(m.content_str(), "hi bob");
        assert_eq!(m.message_id, Some(outcome.message_id));
        assert!(m.timestamp.unwrap().ends_with('Z'));

        // Durable copy exists too
        assert_eq!(storage.fetch_unread(BOB).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn full_queue_degrades_silently() {
        let (registry, storage, router) = setup().await;
        let (handle, _queue) = Connection::open(BOB, 1).into_parts();
        handle.try_push(RelayFrame::Ping).unwrap();
        registry.register(handle);

        let outcome = router.route(ALICE, BOB, "overflow".into()).await.unwrap();
        assert_eq!(outcome.live, LiveDelivery::Dropped);
        assert!(outcome.live.live_push_attempted());

        let unread = storage.fetch_unread(BOB).await.unwrap();
        assert_eq!(unread[0].content, "overflow");
    }

    #[tokio::test]
    async fn closed_connection_degrades_silently() {
        let (registry, _storage, router) = setup().await;
        let (handle, _queue) = Connection::open(BOB, 8).into_parts();
        registry.register(handle.clone());
        handle.close();

        let outcome = router.route(ALICE, BOB, "late".into()).await.unwrap();
        assert_eq!(outcome.live, LiveDelivery::Dropped);
    }

    #[tokio::test]
    async fn message_to_self_is_delivered_live() {
        let (registry, _storage, router) = setup().await;
        let (handle, mut queue) = Connection::open(ALICE, 8).into_parts();
        registry.register(handle);

        let outcome = router.route(ALICE, ALICE, "note".into()).await.unwrap();
        assert_eq!(outcome.live, LiveDelivery::Queued);
        assert!(matches!(queue.recv().await, Some(RelayFrame::Message(_))));
    }

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn save(&self, _: UserId, _: UserId, _: &str) -> Result<MessageId, StorageError> {
            Err(StorageError::Database(sqlx::Error::PoolClosed))
        }
        async fn fetch_unread(&self, _: UserId) -> Result<Vec<StoredMessage>, StorageError> {
            Ok(Vec::new())
        }
        async fn mark_read(&self, _: MessageId) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn conversation(
            &self,
            _: UserId,
            _: UserId,
            _: u32,
        ) -> Result<Vec<StoredMessage>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn persistence_failure_is_fatal_and_skips_live_push() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(registry.clone(), Arc::new(FailingStore));
        let (handle, mut queue) = Connection::open(BOB, 8).into_parts();
        registry.register(handle.clone());

        let result = router.route(ALICE, BOB, "lost".into()).await;
        assert!(matches!(result, Err(RouteError::Persistence(_))));

        // Nothing was queued
        handle.close();
        assert_eq!(queue.recv().await, None);
    }
}
