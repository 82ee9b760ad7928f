//! Rate limiting for murmur-relay.
//!
//! Protects the durable store and live queues from message floods. Senders
//! are identified by the authenticated [`UserId`], so one user's quota is
//! shared across reconnects. A global limiter caps aggregate throughput even
//! when every individual user is within quota.
//!
//! Both use the governor crate; the per-user limiter is backed by DashMap.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use murmur_types::UserId;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Message rate limiters for the relay.
#[derive(Clone)]
pub struct RateLimits {
    /// Per-user quota, `limits.messages_per_minute`.
    message_limiter: Arc<KeyedLimiter<UserId>>,

    /// Aggregate quota, `limits.global_messages_per_second`.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("message_limiter", &"KeyedLimiter<UserId>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// Zero quotas are rejected by [`Config::validate`](crate::Config::validate);
    /// if one slips through it is treated as a quota of one.
    pub fn new(config: &LimitsConfig) -> Self {
        let per_user = NonZeroU32::new(config.messages_per_minute).unwrap_or(NonZeroU32::MIN);
        let global = NonZeroU32::new(config.global_messages_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            message_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_user))),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(global))),
        }
    }

    /// Check whether `user` may send another message.
    ///
    /// The global quota is consumed only when the per-user check passes.
    pub fn check_message(&self, user: UserId) -> Result<(), RateLimitError> {
        self.message_limiter
            .check_key(&user)
            .map_err(|_| RateLimitError::UserLimitExceeded)?;
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Number of users currently tracked by the per-user limiter.
    pub fn tracked_users(&self) -> usize {
        self.message_limiter.len()
    }

    /// Evict users whose quota has fully recharged.
    pub fn shrink(&self) {
        self.message_limiter.retain_recent();
        self.message_limiter.shrink_to_fit();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// This user sent too many messages.
    #[error("message rate limit exceeded")]
    UserLimitExceeded,
    /// Aggregate message rate exceeded across all users.
    #[error("global rate limit exceeded")]
    GlobalLimitExceeded,
}
