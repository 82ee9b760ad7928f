//! # murmur-types
//!
//! Wire format types for the Murmur relay protocol.
//!
//! This crate provides the foundational types shared by the relay server and
//! the client proxy:
//! - [`UserId`], [`MessageId`] - Identity and durable message identifiers
//! - [`RelayFrame`] - The JSON frames exchanged over a real-time connection
//! - [`FrameReader`], [`FrameWriter`] - Transport abstraction for frame I/O
//! - [`FrameError`], [`TransportError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod frame;
mod ids;
pub mod transport;

pub use error::{FrameError, TransportError};
pub use frame::{ErrorFrame, MessageFrame, MessageSent, RelayFrame, MESSAGE_SENT_TEXT};
pub use ids::{MessageId, UserId};
pub use transport::{FrameReader, FrameWriter};
