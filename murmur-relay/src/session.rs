//! Per-connection relay session.
//!
//! A session moves through `Open → Authenticated → Active → Closed`:
//!
//! - [`RelaySession::authenticate`] validates the bearer credential during the
//!   upgrade handshake. A rejected credential closes the session before any
//!   connection is registered.
//! - [`RelaySession::run`] registers the connection and runs two loops until
//!   either side fails:
//!
//! ```text
//!   reader ──► inbound loop ──► router ──► receiver's queue
//!                   │
//!                   └─ acks / pong / errors ──► own queue ──► outbound loop ──► writer
//! ```
//!
//! Whichever loop stops first runs the teardown (unregister, close the
//! queue) exactly once. The outbound loop alone closes the writer, after
//! draining what is already queued.

use crate::error::{AuthError, SessionError};
use crate::registry::{Connection, ConnectionHandle, OutboundQueue};
use crate::server::RelayServer;
use murmur_types::{FrameReader, FrameWriter, MessageFrame, RelayFrame, UserId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Error text for a `message` frame with no `receiver_id`.
pub const RECEIVER_REQUIRED: &str = "receiver_id is required";
/// Error text for content over `limits.max_content_bytes`.
pub const MESSAGE_TOO_LARGE: &str = "message too large";
/// Error text for a rate-limited message.
pub const RATE_LIMITED: &str = "rate limit exceeded";
/// Error text when the durable store fails.
pub const SAVE_FAILED: &str = "Failed to save message";

/// Upper bound on draining the outbound queue after the inbound side stops.
const OUTBOUND_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Session state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Upgrade requested, credential not yet checked.
    Open,
    /// Credential accepted; connection not yet registered.
    Authenticated,
    /// Registered and relaying frames.
    Active,
    /// Terminated. Terminal state.
    Closed,
}

impl SessionState {
    fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::Authenticated => "authenticated",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        }
    }
}

/// A per-connection session.
pub struct RelaySession {
    server: Arc<RelayServer>,
    state: SessionState,
    identity: Option<UserId>,
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("state", &self.state)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl RelaySession {
    /// Create a new session in the `Open` state.
    pub fn new(server: Arc<RelayServer>) -> Self {
        Self {
            server,
            state: SessionState::Open,
            identity: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Authenticated identity, once known.
    pub fn identity(&self) -> Option<UserId> {
        self.identity
    }

    /// Validate the upgrade credential: `Open → Authenticated`, or
    /// `Open → Closed` on rejection.
    pub fn authenticate(&mut self, credential: Option<&str>) -> Result<UserId, SessionError> {
        if self.state != SessionState::Open {
            return Err(SessionError::InvalidState {
                expected: SessionState::Open.as_str(),
                actual: self.state.as_str(),
            });
        }

        let result = credential
            .ok_or(AuthError::MissingCredential)
            .and_then(|token| self.server.validator().validate(token));

        match result {
            Ok(user) => {
                self.state = SessionState::Authenticated;
                self.identity = Some(user);
                Ok(user)
            }
            Err(e) => {
                self.state = SessionState::Closed;
                self.server
                    .metrics()
                    .connections_rejected
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Rejected upgrade: {}", e);
                Err(SessionError::Unauthenticated(e))
            }
        }
    }

    /// Register the connection and relay frames until it closes.
    ///
    /// Returns `Ok(())` on an orderly close or eviction,
    /// [`SessionError::MalformedFrame`] if the peer sent garbage.
    pub async fn run<R, W>(mut self, reader: R, writer: W) -> Result<(), SessionError>
    where
        R: FrameReader + 'static,
        W: FrameWriter + 'static,
    {
        let identity = match (self.state, self.identity) {
            (SessionState::Authenticated, Some(identity)) => identity,
            _ => {
                return Err(SessionError::InvalidState {
                    expected: SessionState::Authenticated.as_str(),
                    actual: self.state.as_str(),
                })
            }
        };

        let capacity = self.server.config().limits.outbound_queue_capacity;
        let (handle, queue) = Connection::open(identity, capacity).into_parts();
        self.server.registry().register(handle.clone());
        self.state = SessionState::Active;
        self.server
            .metrics()
            .connections_total
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!("User {} connected (connection {})", identity, handle.id());

        let teardown = Arc::new(Teardown {
            done: AtomicBool::new(false),
            server: self.server.clone(),
            handle: handle.clone(),
        });

        let mut outbound = tokio::spawn(outbound_loop(queue, writer, teardown.clone()));
        let result = self.inbound_loop(identity, reader, &handle).await;
        teardown.run();

        if tokio::time::timeout(OUTBOUND_DRAIN_TIMEOUT, &mut outbound)
            .await
            .is_err()
        {
            tracing::debug!("Outbound drain timed out for connection {}", handle.id());
            outbound.abort();
        }

        self.state = SessionState::Closed;
        tracing::info!("User {} disconnected (connection {})", identity, handle.id());
        result
    }

    async fn inbound_loop<R: FrameReader>(
        &self,
        identity: UserId,
        mut reader: R,
        handle: &ConnectionHandle,
    ) -> Result<(), SessionError> {
        loop {
            let next = tokio::select! {
                _ = handle.closed() => {
                    tracing::debug!("Connection {} closed, stopping reads", handle.id());
                    return Ok(());
                }
                next = reader.read_frame() => next,
            };

            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) if e.is_malformed() => {
                    self.server
                        .metrics()
                        .malformed_frames
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Malformed frame from user {}: {}", identity, e);
                    return Err(SessionError::MalformedFrame(e));
                }
                Err(e) => {
                    tracing::debug!("Read failed for user {}: {}", identity, e);
                    return Err(SessionError::Transport(e));
                }
            };

            let reply = match frame {
                RelayFrame::Message(message) => Some(self.handle_message(identity, message).await),
                RelayFrame::Ping => Some(RelayFrame::Pong),
                other => {
                    tracing::debug!("Ignoring {} frame from user {}", other.kind(), identity);
                    None
                }
            };

            if let Some(reply) = reply {
                if handle.push(reply).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    async fn handle_message(&self, sender: UserId, message: MessageFrame) -> RelayFrame {
        let Some(receiver) = message.receiver_id else {
            tracing::warn!("Message from user {} has no receiver_id", sender);
            return RelayFrame::error(RECEIVER_REQUIRED);
        };

        let content = message.content.unwrap_or_default();
        let max = self.server.config().limits.max_content_bytes;
        if content.len() > max {
            tracing::warn!(
                "Message from user {} too large: {} bytes (limit {})",
                sender,
                content.len(),
                max
            );
            return RelayFrame::error(MESSAGE_TOO_LARGE);
        }

        if let Err(e) = self.server.rate_limits().check_message(sender) {
            self.server
                .metrics()
                .rate_limit_hits
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!("User {} rate limited: {}", sender, e);
            return RelayFrame::error(RATE_LIMITED);
        }

        match self.server.router().route(sender, receiver, content).await {
            Ok(outcome) => {
                self.server.metrics().record_delivery(&outcome);
                RelayFrame::message_sent(outcome.message_id)
            }
            Err(e) => {
                self.server
                    .metrics()
                    .persistence_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Failed to route message from user {}: {}", sender, e);
                RelayFrame::error(SAVE_FAILED)
            }
        }
    }
}

/// Close-once cleanup shared by both loops.
struct Teardown {
    done: AtomicBool,
    server: Arc<RelayServer>,
    handle: ConnectionHandle,
}

impl Teardown {
    fn run(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.server.registry().unregister(&self.handle);
        self.handle.close();
    }
}

async fn outbound_loop<W: FrameWriter>(
    mut queue: OutboundQueue,
    mut writer: W,
    teardown: Arc<Teardown>,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = writer.write_frame(&frame).await {
            tracing::debug!("Write failed: {}", e);
            break;
        }
    }

    teardown.run();
    if let Err(e) = writer.close().await {
        tracing::debug!("Close failed: {}", e);
    }
}
