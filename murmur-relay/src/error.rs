//! Error types for murmur-relay.

use murmur_types::TransportError;

/// Main error type for murmur-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Session error.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Authentication error.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failures of a single relay session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Credential rejected during the upgrade handshake.
    #[error("unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),

    /// Operation not valid in the session's current state.
    #[error("invalid session state: expected {expected}, found {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: &'static str,
        /// State the session is in.
        actual: &'static str,
    },

    /// Peer sent an unparseable frame; the session was terminated.
    #[error("malformed frame: {0}")]
    MalformedFrame(TransportError),

    /// Underlying transport failed.
    #[error("transport error: {0}")]
    Transport(TransportError),
}

/// Message routing errors.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The durable store could not save the message.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),
}

/// Bearer-token validation errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("missing credential")]
    MissingCredential,

    /// Credential failed validation.
    #[error("invalid token: {0}")]
    InvalidToken(String),
}
