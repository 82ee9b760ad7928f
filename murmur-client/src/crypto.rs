//! Cryptographic primitives for Murmur.
//!
//! This module provides:
//! - P-256 key pair generation for user identities
//! - Per-message ECDH with a fresh ephemeral key pair
//! - AES-256-GCM authenticated encryption under SHA-256(shared secret)
//!
//! # Envelope Format
//!
//! ```text
//! ┌────────────────────────┬──────────────┬──────────────────────────┐
//! │ ephemeral public key   │ nonce        │ ciphertext ∥ tag         │
//! │ 65 bytes (SEC1, 0x04…) │ 12 bytes     │ len(plaintext) + 16      │
//! └────────────────────────┴──────────────┴──────────────────────────┘
//! ```
//!
//! Envelopes cross the text-based frame transport as standard base64
//! (see [`seal_text`] / [`open_text`]).
//!
//! # Security Notes
//!
//! - Every call to [`encrypt`] draws a new ephemeral key pair; ephemeral
//!   secrets are never reused, so exposing one message key exposes only
//!   that message
//! - Nonces are 96-bit random values, drawn per call
//! - Randomness comes from the operating system; if it is unavailable the
//!   operation fails with [`CryptoError::RandomSource`]

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

/// Uncompressed SEC1 P-256 public key size (0x04 ∥ X ∥ Y).
pub const PUBLIC_KEY_SIZE: usize = 65;

/// Private scalar size.
pub const PRIVATE_KEY_SIZE: usize = 32;

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size for AES-256-GCM.
pub const TAG_SIZE: usize = 16;

/// Smallest byte string that can be parsed as an envelope.
pub const MIN_ENVELOPE_SIZE: usize = PUBLIC_KEY_SIZE + NONCE_SIZE;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Envelope is too short to contain a key and a nonce.
    #[error("malformed envelope: {len} bytes, need at least {MIN_ENVELOPE_SIZE}")]
    MalformedEnvelope {
        /// Actual envelope length.
        len: usize,
    },

    /// Integrity tag did not verify.
    #[error("decryption failed: authentication error")]
    AuthenticationFailure,

    /// Key bytes are not a valid P-256 key.
    #[error("invalid key material: {0}")]
    KeyParseError(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailure(String),

    /// The operating system random source failed.
    #[error("secure random source unavailable: {0}")]
    RandomSource(String),

    /// Transport encoding (base64 / UTF-8) is invalid.
    #[error("invalid encoding: {0}")]
    Encoding(String),
}

/// A user's public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

impl PublicKey {
    /// Parse a SEC1-encoded point (compressed or uncompressed).
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        p256::PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| CryptoError::KeyParseError("not a P-256 point".into()))
    }

    /// Parse the base64 transport form.
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(text.trim())
            .map_err(|e| CryptoError::KeyParseError(e.to_string()))?;
        Self::from_sec1_bytes(&bytes)
    }

    /// Uncompressed SEC1 encoding.
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Base64 transport form of the uncompressed point.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_sec1_bytes())
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let encoded = self.to_base64();
        write!(f, "PublicKey({}…)", &encoded[..12])
    }
}

/// A user's private key.
///
/// Lives only in client memory for the lifetime of a session. The
/// underlying scalar is zeroized on drop.
#[derive(Clone)]
pub struct PrivateKey(p256::SecretKey);

impl PrivateKey {
    /// Parse a raw 32-byte big-endian scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PRIVATE_KEY_SIZE {
            return Err(CryptoError::KeyParseError(format!(
                "expected {} bytes, got {}",
                PRIVATE_KEY_SIZE,
                bytes.len()
            )));
        }
        p256::SecretKey::from_slice(bytes)
            .map(Self)
            .map_err(|_| CryptoError::KeyParseError("scalar out of range".into()))
    }

    /// Parse the base64 transport form.
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(
            BASE64
                .decode(text.trim())
                .map_err(|e| CryptoError::KeyParseError(e.to_string()))?,
        );
        Self::from_bytes(&bytes)
    }

    /// Base64 transport form of the raw scalar.
    pub fn to_base64(&self) -> Zeroizing<String> {
        let bytes = self.0.to_bytes();
        Zeroizing::new(BASE64.encode(bytes.as_slice()))
    }

    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }
}

// Don't leak secret in debug output
impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

/// A P-256 key pair.
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// Shareable half, published through the key directory.
    pub public: PublicKey,
    /// Secret half, never sent to the relay.
    pub private: PrivateKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS random source.
    pub fn generate() -> Result<Self, CryptoError> {
        let secret = random_secret_key()?;
        Ok(Self {
            public: PublicKey(secret.public_key()),
            private: PrivateKey(secret),
        })
    }
}

/// Generate a fresh key pair. See [`KeyPair::generate`].
pub fn generate_key_pair() -> Result<KeyPair, CryptoError> {
    KeyPair::generate()
}

/// Encrypt `plaintext` for the holder of `recipient`'s private key.
///
/// Returns `ephemeral public key ∥ nonce ∥ ciphertext-with-tag`.
pub fn encrypt(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = random_secret_key()?;
    let cipher = message_cipher(&ephemeral, &recipient.0)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce_bytes)
        .map_err(|e| CryptoError::RandomSource(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(&Nonce::from(nonce_bytes), plaintext)
        .map_err(|_| CryptoError::EncryptionFailure("aead encrypt failed".into()))?;

    let ephemeral_public = ephemeral.public_key().to_encoded_point(false);

    let mut envelope = Vec::with_capacity(MIN_ENVELOPE_SIZE + ciphertext.len());
    envelope.extend_from_slice(ephemeral_public.as_bytes());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Decrypt an envelope produced by [`encrypt`].
///
/// Never returns partial plaintext: either the tag verifies and the whole
/// message is returned, or [`CryptoError::AuthenticationFailure`].
pub fn decrypt(private: &PrivateKey, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if envelope.len() < MIN_ENVELOPE_SIZE {
        return Err(CryptoError::MalformedEnvelope {
            len: envelope.len(),
        });
    }

    let (ephemeral_bytes, rest) = envelope.split_at(PUBLIC_KEY_SIZE);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

    let ephemeral = p256::PublicKey::from_sec1_bytes(ephemeral_bytes)
        .map_err(|_| CryptoError::KeyParseError("ephemeral key is not a P-256 point".into()))?;

    let nonce: [u8; NONCE_SIZE] = nonce_bytes
        .try_into()
        .map_err(|_| CryptoError::MalformedEnvelope { len: envelope.len() })?;

    let cipher = message_cipher(&private.0, &ephemeral)?;
    cipher
        .decrypt(&Nonce::from(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailure)
}

/// Encrypt UTF-8 text and encode the envelope as base64.
pub fn seal_text(recipient: &PublicKey, plaintext: &str) -> Result<String, CryptoError> {
    encrypt(recipient, plaintext.as_bytes()).map(|envelope| BASE64.encode(envelope))
}

/// Decode a base64 envelope and decrypt it to UTF-8 text.
pub fn open_text(private: &PrivateKey, sealed: &str) -> Result<String, CryptoError> {
    let envelope = BASE64
        .decode(sealed.trim())
        .map_err(|e| CryptoError::Encoding(e.to_string()))?;
    let plaintext = decrypt(private, &envelope)?;
    String::from_utf8(plaintext).map_err(|e| CryptoError::Encoding(e.to_string()))
}

/// Derive the per-message cipher: AES-256-GCM keyed by SHA-256 of the ECDH
/// shared x-coordinate.
fn message_cipher(
    secret: &p256::SecretKey,
    public: &p256::PublicKey,
) -> Result<Aes256Gcm, CryptoError> {
    let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let key: Zeroizing<[u8; 32]> = Zeroizing::new(Sha256::digest(shared.raw_secret_bytes()).into());

    Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| CryptoError::EncryptionFailure(e.to_string()))
}

/// Draw a P-256 secret scalar from the OS random source.
fn random_secret_key() -> Result<p256::SecretKey, CryptoError> {
    let mut bytes = Zeroizing::new([0u8; PRIVATE_KEY_SIZE]);
    loop {
        getrandom::getrandom(bytes.as_mut_slice())
            .map_err(|e| CryptoError::RandomSource(e.to_string()))?;
        // Zero and values >= the group order are redrawn.
        if let Ok(secret) = p256::SecretKey::from_slice(bytes.as_slice()) {
            return Ok(secret);
        }
    }
}
