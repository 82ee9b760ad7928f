//! Error types for Murmur wire handling.

use thiserror::Error;

/// Errors produced while encoding or decoding relay frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Inbound text was not a valid frame.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Frame could not be serialized.
    #[error("frame serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),
}

/// Errors produced by a frame transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer sent data that is not a valid frame.
    #[error(transparent)]
    Malformed(#[from] FrameError),

    /// The connection is already closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),
}

impl TransportError {
    /// Whether this error means the peer sent unparseable data.
    pub fn is_malformed(&self) -> bool {
        matches!(self, TransportError::Malformed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_is_detected() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let transport: TransportError = FrameError::Malformed(err).into();
        assert!(transport.is_malformed());
        assert!(!TransportError::ConnectionClosed.is_malformed());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FrameError>();
        assert_send_sync::<TransportError>();
    }
}
