//! In-memory frame transport.
//!
//! [`duplex`] returns two connected endpoints. Frames travel as JSON text,
//! exactly as they would over a WebSocket, so parsing failures surface the
//! same way they do on a real connection.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{FrameReader, FrameWriter};
use crate::{RelayFrame, TransportError};

/// Create a connected pair of in-memory endpoints.
///
/// `capacity` bounds the number of in-flight frames in each direction.
pub fn duplex(capacity: usize) -> (MemoryEndpoint, MemoryEndpoint) {
    let (a_tx, a_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, b_rx) = mpsc::channel(capacity.max(1));
    (
        MemoryEndpoint {
            reader: MemoryReader { rx: b_rx },
            writer: MemoryWriter { tx: Some(a_tx) },
        },
        MemoryEndpoint {
            reader: MemoryReader { rx: a_rx },
            writer: MemoryWriter { tx: Some(b_tx) },
        },
    )
}

/// One side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryEndpoint {
    reader: MemoryReader,
    writer: MemoryWriter,
}

impl MemoryEndpoint {
    /// Split into independently owned read and write halves.
    pub fn split(self) -> (MemoryReader, MemoryWriter) {
        (self.reader, self.writer)
    }
}

/// Read half of an in-memory connection.
#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::Receiver<String>,
}

/// Write half of an in-memory connection.
#[derive(Debug)]
pub struct MemoryWriter {
    tx: Option<mpsc::Sender<String>>,
}

impl MemoryWriter {
    /// Send raw text without encoding it as a frame.
    ///
    /// Used to inject malformed input.
    pub async fn send_raw(&mut self, text: &str) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(text.to_string())
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Whether [`FrameWriter::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Option<RelayFrame>, TransportError> {
        match self.rx.recv().await {
            Some(text) => Ok(Some(RelayFrame::from_json(&text)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: &RelayFrame) -> Result<(), TransportError> {
        let text = frame.to_json()?;
        self.send_raw(&text).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessageFrame, UserId};

    #[tokio::test]
    async fn frames_cross_the_pair() {
        let (a, b) = duplex(8);
        let (_a_reader, mut a_writer) = a.split();
        let (mut b_reader, _b_writer) = b.split();

        let frame = RelayFrame::Message(MessageFrame {
            receiver_id: Some(UserId::new(2)),
            content: Some("hello".into()),
            ..Default::default()
        });
        a_writer.write_frame(&frame).await.unwrap();
        a_writer.write_frame(&RelayFrame::Ping).await.unwrap();

        assert_eq!(b_reader.read_frame().await.unwrap(), Some(frame));
        assert_eq!(b_reader.read_frame().await.unwrap(), Some(RelayFrame::Ping));
    }

    #[tokio::test]
    async fn close_ends_peer_reads() {
        let (a, b) = duplex(8);
        let (_a_reader, mut a_writer) = a.split();
        let (mut b_reader, _b_writer) = b.split();

        a_writer.close().await.unwrap();
        assert!(a_writer.is_closed());
        assert_eq!(b_reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (a, _b) = duplex(8);
        let (_reader, mut writer) = a.split();

        writer.close().await.unwrap();
        writer.close().await.unwrap();
        assert!(matches!(
            writer.write_frame(&RelayFrame::Ping).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn raw_garbage_reads_as_malformed() {
        let (a, b) = duplex(8);
        let (_a_reader, mut a_writer) = a.split();
        let (mut b_reader, _b_writer) = b.split();

        a_writer.send_raw("{{{").await.unwrap();
        let err = b_reader.read_frame().await.unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn write_fails_when_peer_dropped() {
        let (a, b) = duplex(8);
        let (_a_reader, mut a_writer) = a.split();
        drop(b);

        assert!(a_writer.write_frame(&RelayFrame::Ping).await.is_err());
    }
}
