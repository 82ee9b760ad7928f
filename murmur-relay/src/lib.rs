//! # murmur-relay
//!
//! Presence-aware relay for end-to-end encrypted direct messages.
//!
//! This crate implements a relay server that:
//! - Accepts authenticated WebSocket connections, one live connection per user
//! - Persists every message before attempting live delivery
//! - Pushes messages to online receivers and leaves them unread for offline ones
//! - Never sees plaintext (message content is an opaque sealed envelope)
//!
//! ## Architecture
//!
//! ```text
//! Alice ──┐                           ┌── Bob
//!         │        WebSocket          │
//!         ├──────────────────────────►│
//!         │                           │
//!     ┌───┴───────────────────────────┴───┐
//!     │            murmur-relay           │
//!     │  ┌──────────┐    ┌────────────┐   │
//!     │  │ registry │◄───│   router   │   │
//!     │  └──────────┘    └─────┬──────┘   │
//!     │                  ┌─────▼──────┐   │
//!     │                  │  SQLite    │   │
//!     │                  └────────────┘   │
//!     └───────────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! JSON text frames tagged by `type`:
//! - `message` → persisted, `message_sent` acknowledgement to the sender,
//!   live push to the receiver if online
//! - `ping` → `pong`
//! - failures → `error` with a human-readable `content`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod storage;

pub use config::Config;
pub use error::RelayError;
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use router::{DeliveryOutcome, LiveDelivery, MessageRouter};
pub use server::RelayServer;
pub use session::{RelaySession, SessionState};
pub use storage::SqliteStorage;
