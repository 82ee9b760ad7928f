//! # murmur-client
//!
//! Client side of Murmur: end-to-end encryption and the local relay proxy.
//!
//! The UI talks plaintext frames to the proxy on localhost. The proxy seals
//! each outbound message for its receiver and opens each inbound one with
//! the user's private key, so the relay only ever stores and forwards
//! envelopes.
//!
//! ## Features
//!
//! - **E2E Encryption**: P-256 ECDH with a fresh ephemeral key per message,
//!   SHA-256 key derivation, AES-256-GCM
//! - **Key Directory**: receiver public keys resolved through the relay's
//!   key API
//! - **Dual-hop Proxy**: seal/open transform over two frame transports
//! - **Local REST surface**: send, unread and key generation routes that
//!   seal and open on the user's behalf
//!
//! ## Example
//!
//! ```ignore
//! use murmur_client::crypto::{seal_text, open_text, KeyPair};
//!
//! let bob = KeyPair::generate()?;
//! let envelope = seal_text(&bob.public, "hello")?;
//! assert_eq!(open_text(&bob.private, &envelope)?, "hello");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod http;
pub mod proxy;
pub mod ws;

pub use api::{RelayApi, RelayApiError, RelayMessage};
pub use crypto::{CryptoError, KeyPair, PrivateKey, PublicKey};
pub use directory::{HttpKeyDirectory, KeyLookupError, MemoryKeyDirectory, PublicKeyDirectory};
pub use proxy::{ClientRelayProxy, ProxyError};
