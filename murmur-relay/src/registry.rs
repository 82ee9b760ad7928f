//! Connection registry: which users are online, and how to reach them.
//!
//! Each live connection has a [`ConnectionHandle`] (the sending side of its
//! bounded outbound queue) and an [`OutboundQueue`] (the receiving side,
//! drained by the session's outbound loop). The registry maps each
//! [`UserId`] to at most one handle.
//!
//! ## Locking
//!
//! All state sits behind one `std::sync::RwLock`. Lookups take the shared
//! lock, register/unregister take the exclusive lock, and the lock is held
//! only for map manipulation. No guard ever crosses an `.await`.

use murmur_types::{RelayFrame, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, watch};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// The queue is at capacity.
    #[error("outbound queue full")]
    Full,
    /// The connection was closed.
    #[error("connection closed")]
    Closed,
}

/// A freshly opened connection: its shareable handle plus the queue that
/// only the owning session may drain.
#[derive(Debug)]
pub struct Connection {
    handle: ConnectionHandle,
    queue: OutboundQueue,
}

impl Connection {
    /// Open a connection for `identity` with a queue of `capacity` frames.
    pub fn open(identity: UserId, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (closed_tx, closed_rx) = watch::channel(false);

        let handle = ConnectionHandle {
            inner: Arc::new(HandleInner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                identity,
                tx,
                closed: closed_tx,
            }),
        };

        Self {
            handle,
            queue: OutboundQueue {
                rx,
                closed: closed_rx,
            },
        }
    }

    /// The shareable handle.
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Split into handle and queue.
    pub fn into_parts(self) -> (ConnectionHandle, OutboundQueue) {
        (self.handle, self.queue)
    }
}

struct HandleInner {
    id: u64,
    identity: UserId,
    tx: mpsc::Sender<RelayFrame>,
    closed: watch::Sender<bool>,
}

/// Cloneable sending side of a connection's outbound queue.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("identity", &self.inner.identity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionHandle {
    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The user who owns this connection.
    pub fn identity(&self) -> UserId {
        self.inner.identity
    }

    /// Queue a frame without waiting.
    pub fn try_push(&self, frame: RelayFrame) -> Result<(), PushError> {
        if self.is_closed() {
            return Err(PushError::Closed);
        }
        self.inner.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    /// Queue a frame, waiting for capacity. Gives up when the connection closes.
    pub async fn push(&self, frame: RelayFrame) -> Result<(), PushError> {
        if self.is_closed() {
            return Err(PushError::Closed);
        }
        let mut closed = self.inner.closed.subscribe();
        tokio::select! {
            sent = self.inner.tx.send(frame) => sent.map_err(|_| PushError::Closed),
            _ = closed.wait_for(|c| *c) => Err(PushError::Closed),
        }
    }

    /// Signal closure. Returns `true` only for the call that closed it.
    ///
    /// Frames already queued are still drained by the [`OutboundQueue`].
    pub fn close(&self) -> bool {
        self.inner.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolve once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        let _ = rx.wait_for(|c| *c).await;
    }

    fn same_connection(&self, other: &ConnectionHandle) -> bool {
        self.inner.id == other.inner.id
    }
}

/// Receiving side of a connection's outbound queue.
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::Receiver<RelayFrame>,
    closed: watch::Receiver<bool>,
}

impl OutboundQueue {
    /// Next frame to write, FIFO.
    ///
    /// After the handle is closed, remaining buffered frames are still
    /// returned; `None` means closed and drained.
    pub async fn recv(&mut self) -> Option<RelayFrame> {
        tokio::select! {
            biased;
            frame = self.rx.recv() => frame,
            _ = self.closed.wait_for(|c| *c) => self.rx.try_recv().ok(),
        }
    }
}

/// Registry of live connections, at most one per user.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` as the live connection for its identity.
    ///
    /// A prior connection for the same identity is replaced and closed, and
    /// returned to the caller.
    pub fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let identity = handle.identity();
        let id = handle.id();

        let evicted = {
            let mut map = self
                .connections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            map.insert(identity, handle)
        };

        match &evicted {
            Some(old) if old.id() != id => {
                old.close();
                tracing::info!(
                    "Replaced connection {} for user {} with {}",
                    old.id(),
                    identity,
                    id
                );
            }
            _ => tracing::debug!("Registered connection {} for user {}", id, identity),
        }

        evicted
    }

    /// Remove `handle` if it is still the registered connection for its
    /// identity. Returns whether an entry was removed.
    ///
    /// Does not close the handle.
    pub fn unregister(&self, handle: &ConnectionHandle) -> bool {
        let mut map = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match map.get(&handle.identity()) {
            Some(current) if current.same_connection(handle) => {
                map.remove(&handle.identity());
                tracing::debug!(
                    "Unregistered connection {} for user {}",
                    handle.id(),
                    handle.identity()
                );
                true
            }
            _ => false,
        }
    }

    /// Live connection for `identity`, if any.
    pub fn lookup(&self, identity: UserId) -> Option<ConnectionHandle> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&identity)
            .cloned()
    }

    /// Snapshot of online users, sorted. May be stale as soon as it returns.
    pub fn list_online(&self) -> Vec<UserId> {
        let mut online: Vec<UserId> = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        online.sort_unstable();
        online
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const ALICE: UserId = UserId::new(1);
    const BOB: UserId = UserId::new(2);

    // ===========================================
    // Connection / Queue Tests
    // ===========================================

    #[tokio::test]
    async fn queue_is_fifo() {
        let (handle, mut queue) = Connection::open(ALICE, 8).into_parts();

        handle.try_push(RelayFrame::Ping).unwrap();
        handle.try_push(RelayFrame::Pong).unwrap();

        assert_eq!(queue.recv().await, Some(RelayFrame::Ping));
        assert_eq!(queue.recv().await, Some(RelayFrame::Pong));
    }

    #[tokio::test]
    async fn try_push_reports_full_queue() {
        let (handle, _queue) = Connection::open(ALICE, 2).into_parts();

        handle.try_push(RelayFrame::Ping).unwrap();
        handle.try_push(RelayFrame::Ping).unwrap();
        assert_eq!(handle.try_push(RelayFrame::Ping), Err(PushError::Full));
    }

    #[tokio::test]
    async fn close_drains_then_ends_queue() {
        let (handle, mut queue) = Connection::open(ALICE, 8).into_parts();

        handle.try_push(RelayFrame::Ping).unwrap();
        assert!(handle.close());

        assert_eq!(queue.recv().await, Some(RelayFrame::Ping));
        assert_eq!(queue.recv().await, None);
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (handle, _queue) = Connection::open(ALICE, 8).into_parts();

        assert!(handle.close());
        assert!(!handle.close());
        assert!(handle.is_closed());
        assert_eq!(handle.try_push(RelayFrame::Ping), Err(PushError::Closed));
    }

    #[tokio::test]
    async fn push_after_queue_dropped_fails() {
        let (handle, queue) = Connection::open(ALICE, 8).into_parts();
        drop(queue);
        assert_eq!(handle.try_push(RelayFrame::Ping), Err(PushError::Closed));
        assert_eq!(handle.push(RelayFrame::Ping).await, Err(PushError::Closed));
    }

    #[tokio::test]
    async fn blocked_push_gives_up_on_close() {
        let (handle, _queue) = Connection::open(ALICE, 1).into_parts();
        handle.try_push(RelayFrame::Ping).unwrap();

        let pusher = handle.clone();
        let task = tokio::spawn(async move { pusher.push(RelayFrame::Pong).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.close();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(PushError::Closed));
    }

    #[tokio::test]
    async fn closed_resolves_after_close() {
        let (handle, _queue) = Connection::open(ALICE, 1).into_parts();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.closed().await });

        handle.close();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn connection_ids_are_unique() {
        let a = Connection::open(ALICE, 1);
        let b = Connection::open(ALICE, 1);
        assert_ne!(a.handle().id(), b.handle().id());
    }

    // ===========================================
    // Registry Tests
    // ===========================================

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let (handle, _queue) = Connection::open(ALICE, 8).into_parts();

        assert!(registry.register(handle.clone()).is_none());

        let found = registry.lookup(ALICE).unwrap();
        assert_eq!(found.id(), handle.id());
        assert!(registry.lookup(BOB).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn second_register_evicts_and_closes_first() {
        let registry = ConnectionRegistry::new();
        let (first, mut first_queue) = Connection::open(ALICE, 8).into_parts();
        let (second, _second_queue) = Connection::open(ALICE, 8).into_parts();

        registry.register(first.clone());
        let evicted = registry.register(second.clone()).unwrap();

        assert_eq!(evicted.id(), first.id());
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(first_queue.recv().await, None);

        assert_eq!(registry.list_online(), vec![ALICE]);
        assert_eq!(registry.lookup(ALICE).unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn stale_unregister_does_not_remove_newer_connection() {
        let registry = ConnectionRegistry::new();
        let (first, _q1) = Connection::open(ALICE, 8).into_parts();
        let (second, _q2) = Connection::open(ALICE, 8).into_parts();

        registry.register(first.clone());
        registry.register(second.clone());

        assert!(!registry.unregister(&first));
        assert_eq!(registry.lookup(ALICE).unwrap().id(), second.id());

        assert!(registry.unregister(&second));
        assert!(registry.lookup(ALICE).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unregister_does_not_close() {
        let registry = ConnectionRegistry::new();
        let (handle, _queue) = Connection::open(ALICE, 8).into_parts();

        registry.register(handle.clone());
        registry.unregister(&handle);
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn list_online_is_sorted_snapshot() {
        let registry = ConnectionRegistry::new();
        let (bob, _qb) = Connection::open(BOB, 8).into_parts();
        let (alice, _qa) = Connection::open(ALICE, 8).into_parts();

        registry.register(bob);
        registry.register(alice);

        assert_eq!(registry.list_online(), vec![ALICE, BOB]);
    }

    #[tokio::test]
    async fn registries_are_independent() {
        let a = ConnectionRegistry::new();
        let b = ConnectionRegistry::new();
        let (handle, _queue) = Connection::open(ALICE, 8).into_parts();

        a.register(handle);
        assert!(b.lookup(ALICE).is_none());
    }

    #[tokio::test]
    async fn concurrent_registrations_leave_one_entry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();
        let mut handles = Vec::new();

        for _ in 0..16 {
            let (handle, queue) = Connection::open(ALICE, 1).into_parts();
            handles.push((handle.clone(), queue));
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.register(handle);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.len(), 1);
        let live = registry.lookup(ALICE).unwrap();
        for (handle, _) in &handles {
            assert_eq!(handle.is_closed(), handle.id() != live.id());
        }
    }
}
