//! Frame transport over an accepted axum WebSocket.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use super::{FrameReader, FrameWriter};
use crate::{RelayFrame, TransportError};

/// Split an upgraded socket into frame halves.
pub fn split(socket: WebSocket) -> (WebSocketReader, WebSocketWriter) {
    let (sink, stream) = socket.split();
    (
        WebSocketReader { stream },
        WebSocketWriter {
            sink,
            closed: false,
        },
    )
}

/// Read half of an axum WebSocket.
pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
}

/// Write half of an axum WebSocket.
pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameReader for WebSocketReader {
    async fn read_frame(&mut self) -> Result<Option<RelayFrame>, TransportError> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => return Ok(None),
            };

            match message {
                Message::Text(text) => return Ok(Some(RelayFrame::from_json(&text)?)),
                Message::Binary(bytes) => {
                    let text = String::from_utf8_lossy(&bytes);
                    return Ok(Some(RelayFrame::from_json(&text)?));
                }
                Message::Close(_) => return Ok(None),
                // Protocol-level ping/pong is answered by axum
                Message::Ping(_) | Message::Pong(_) => continue,
            }
        }
    }
}

#[async_trait]
impl FrameWriter for WebSocketWriter {
    async fn write_frame(&mut self, frame: &RelayFrame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        let text = frame.to_json()?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Peer may already be gone; a failed close frame is not an error.
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
        Ok(())
    }
}
