//! Client relay proxy.
//!
//! Sits between a local UI and the relay and applies end-to-end encryption
//! so neither the UI nor the relay handles the other side's representation:
//!
//! ```text
//!   UI ──► downstream stage ──(seal)──► relay
//!   UI ◄── upstream stage   ◄─(open)─── relay
//! ```
//!
//! Both stages write to the UI through one shared writer so frames never
//! interleave. Whichever stage stops first closes both connections, once.

use crate::crypto::{self, CryptoError, PrivateKey};
use crate::directory::{KeyLookupError, PublicKeyDirectory};
use murmur_types::{FrameReader, FrameWriter, RelayFrame, TransportError, UserId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};

/// Error text when the receiver's public key cannot be resolved.
pub const KEY_LOOKUP_FAILED: &str = "Failed to get receiver's public key";
/// Error text when sealing the content fails.
pub const ENCRYPT_FAILED: &str = "Failed to encrypt message";

/// Reasons an outbound message cannot be sealed.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// A message with content named no receiver.
    #[error("message has content but no receiver_id")]
    MissingReceiver,

    /// The receiver's public key could not be resolved.
    #[error("key lookup failed: {0}")]
    KeyLookup(#[from] KeyLookupError),

    /// Sealing the content failed.
    #[error("encryption failed: {0}")]
    Encryption(#[from] CryptoError),
}

impl ProxyError {
    /// Text reported to the UI in an `error` frame.
    pub fn user_message(&self) -> &'static str {
        match self {
            ProxyError::MissingReceiver | ProxyError::KeyLookup(_) => KEY_LOOKUP_FAILED,
            ProxyError::Encryption(_) => ENCRYPT_FAILED,
        }
    }
}

/// Encrypting/decrypting forwarder for one UI session.
pub struct ClientRelayProxy {
    directory: Arc<dyn PublicKeyDirectory>,
    private_key: Option<PrivateKey>,
}

impl std::fmt::Debug for ClientRelayProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRelayProxy")
            .field("decrypts", &self.private_key.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientRelayProxy {
    /// Create a proxy that seals outbound messages but cannot open inbound ones.
    pub fn new(directory: Arc<dyn PublicKeyDirectory>) -> Self {
        Self {
            directory,
            private_key: None,
        }
    }

    /// Also open inbound messages with `private_key`.
    pub fn with_private_key(mut self, private_key: PrivateKey) -> Self {
        self.private_key = Some(private_key);
        self
    }

    /// Seal the content of a UI `message` frame for its receiver.
    ///
    /// Other frames, and messages without content, pass through unchanged.
    /// On error the frame must not be forwarded.
    pub async fn seal_outbound(&self, frame: RelayFrame) -> Result<RelayFrame, ProxyError> {
        let mut message = match frame {
            RelayFrame::Message(message) => message,
            other => return Ok(other),
        };

        let plaintext = match message.content.as_deref() {
            Some(content) if !content.is_empty() => content,
            _ => return Ok(RelayFrame::Message(message)),
        };

        let receiver = message.receiver_id.ok_or(ProxyError::MissingReceiver)?;
        let sealed = self.seal_for(receiver, plaintext).await?;

        message.content = Some(sealed);
        Ok(RelayFrame::Message(message))
    }

    /// Seal `plaintext` for `receiver`, returning the base64 envelope.
    pub async fn seal_for(&self, receiver: UserId, plaintext: &str) -> Result<String, ProxyError> {
        let public_key = self.directory.get(receiver).await?;
        Ok(crypto::seal_text(&public_key, plaintext)?)
    }

    /// Open the content of a relay `message` frame.
    ///
    /// Without a private key, or when opening fails, the frame is returned
    /// with its content untouched.
    pub fn open_inbound(&self, frame: RelayFrame) -> RelayFrame {
        let Some(private_key) = &self.private_key else {
            return frame;
        };

        match frame {
            RelayFrame::Message(mut message) => {
                if let Some(sealed) = message.content.as_deref().filter(|c| !c.is_empty()) {
                    match crypto::open_text(private_key, sealed) {
                        Ok(plaintext) => message.content = Some(plaintext),
                        Err(e) => tracing::warn!(
                            "Failed to decrypt message {:?} from {:?}: {}",
                            message.message_id,
                            message.sender_id,
                            e
                        ),
                    }
                }
                RelayFrame::Message(message)
            }
            other => other,
        }
    }

    /// Forward frames between the UI (`downstream`) and the relay
    /// (`upstream`) until either side closes.
    ///
    /// Returns an error if the UI sent an unparseable frame or a connection
    /// failed; an orderly close from either side is `Ok(())`.
    pub async fn run<DR, DW, UR, UW>(
        self,
        downstream: (DR, DW),
        upstream: (UR, UW),
    ) -> Result<(), TransportError>
    where
        DR: FrameReader + 'static,
        DW: FrameWriter + 'static,
        UR: FrameReader + 'static,
        UW: FrameWriter + 'static,
    {
        let (down_reader, down_writer) = downstream;
        let (up_reader, up_writer) = upstream;

        let proxy = Arc::new(self);
        let pipeline = Arc::new(Pipeline::new(down_writer, up_writer));

        let upstream_task = tokio::spawn({
            let proxy = proxy.clone();
            let pipeline = pipeline.clone();
            async move {
                let result = proxy.upstream_stage(up_reader, &pipeline).await;
                pipeline.shutdown().await;
                result
            }
        });

        let downstream_result = proxy.downstream_stage(down_reader, &pipeline).await;
        pipeline.shutdown().await;

        let upstream_result = match upstream_task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Upstream stage panicked: {}", e);
                Ok(())
            }
        };

        downstream_result.and(upstream_result)
    }

    /// UI → relay: seal and forward.
    async fn downstream_stage<R, DW, UW>(
        &self,
        mut reader: R,
        pipeline: &Pipeline<DW, UW>,
    ) -> Result<(), TransportError>
    where
        R: FrameReader,
        DW: FrameWriter,
        UW: FrameWriter,
    {
        loop {
            let next = tokio::select! {
                _ = pipeline.closed() => return Ok(()),
                next = reader.read_frame() => next,
            };

            let frame = match next {
                Ok(Some(RelayFrame::Unknown)) => {
                    tracing::debug!("Ignoring unknown frame from UI");
                    continue;
                }
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) => {
                    if e.is_malformed() {
                        tracing::warn!("Malformed frame from UI: {}", e);
                    }
                    return Err(e);
                }
            };

            let (target, frame) = match self.seal_outbound(frame).await {
                Ok(sealed) => (Side::Upstream, sealed),
                Err(e) => {
                    tracing::warn!("Not forwarding message: {}", e);
                    (Side::Downstream, RelayFrame::error(e.user_message()))
                }
            };

            if let Err(e) = pipeline.write(target, &frame).await {
                return if pipeline.is_closed() {
                    Ok(())
                } else {
                    Err(e)
                };
            }
        }
    }

    /// Relay → UI: open and forward.
    async fn upstream_stage<R, DW, UW>(
        &self,
        mut reader: R,
        pipeline: &Pipeline<DW, UW>,
    ) -> Result<(), TransportError>
    where
        R: FrameReader,
        DW: FrameWriter,
        UW: FrameWriter,
    {
        loop {
            let next = tokio::select! {
                _ = pipeline.closed() => return Ok(()),
                next = reader.read_frame() => next,
            };

            let frame = match next {
                Ok(Some(RelayFrame::Unknown)) => continue,
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) if e.is_malformed() => {
                    tracing::warn!("Skipping malformed frame from relay: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let frame = self.open_inbound(frame);
            if let Err(e) = pipeline.write(Side::Downstream, &frame).await {
                return if pipeline.is_closed() {
                    Ok(())
                } else {
                    Err(e)
                };
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Downstream,
    Upstream,
}

/// Writers of both connections plus the close-once signal.
struct Pipeline<DW, UW> {
    done: AtomicBool,
    closed: watch::Sender<bool>,
    downstream: Mutex<DW>,
    upstream: Mutex<UW>,
}

impl<DW: FrameWriter, UW: FrameWriter> Pipeline<DW, UW> {
    fn new(downstream: DW, upstream: UW) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            done: AtomicBool::new(false),
            closed,
            downstream: Mutex::new(downstream),
            upstream: Mutex::new(upstream),
        }
    }

    /// Write `frame` to one side.
    ///
    /// A write blocked on a peer that stopped reading is abandoned once the
    /// pipeline closes, releasing the writer for [`Pipeline::shutdown`].
    async fn write(&self, side: Side, frame: &RelayFrame) -> Result<(), TransportError> {
        let write = async {
            match side {
                Side::Downstream => self.downstream.lock().await.write_frame(frame).await,
                Side::Upstream => self.upstream.lock().await.write_frame(frame).await,
            }
        };

        tokio::select! {
            _ = self.closed() => Err(TransportError::ConnectionClosed),
            result = write => result,
        }
    }

    fn is_closed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn shutdown(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed.send_replace(true);

        if let Err(e) = self.upstream.lock().await.close().await {
            tracing::debug!("Upstream close failed: {}", e);
        }
        if let Err(e) = self.downstream.lock().await.close().await {
            tracing::debug!("Downstream close failed: {}", e);
        }
    }
}
