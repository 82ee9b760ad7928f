//! Transport abstraction for relay frames.
//!
//! A real-time connection is split into a read half and a write half so that
//! the inbound and outbound loops of a session can run as independent tasks:
//! - [`FrameReader::read_frame`] blocks until the next frame, an orderly
//!   close (`Ok(None)`), or a failure
//! - [`FrameWriter::write_frame`] writes one frame to the wire
//! - [`FrameWriter::close`] terminates the connection and must be idempotent
//!
//! With the `axum` feature, [`axum_ws`] adapts an upgraded axum WebSocket.
//! The [`memory`] transport is used by tests and by embedders that wire
//! sessions together in-process.

#[cfg(feature = "axum")]
pub mod axum_ws;
pub mod memory;

use async_trait::async_trait;

use crate::{RelayFrame, TransportError};

/// Read half of a frame transport.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next frame.
    ///
    /// Returns `Ok(None)` when the peer closed the connection,
    /// `Err(TransportError::Malformed(_))` when it sent an unparseable frame.
    async fn read_frame(&mut self) -> Result<Option<RelayFrame>, TransportError>;
}

/// Write half of a frame transport.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one frame.
    async fn write_frame(&mut self, frame: &RelayFrame) -> Result<(), TransportError>;

    /// Close the connection. A second call is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;
}
