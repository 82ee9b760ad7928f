//! Upstream WebSocket transport to the relay.
//!
//! The proxy dials the relay with `tokio-tungstenite`, presenting the user's
//! bearer token in the `Authorization` header, and exchanges relay frames as
//! JSON text messages.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use murmur_types::{FrameReader, FrameWriter, RelayFrame, TransportError};
use thiserror::Error;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Relay WebSocket path.
pub const RELAY_WS_PATH: &str = "/api/ws";

/// Failure to open the upstream connection.
#[derive(Debug, Error)]
pub enum DialError {
    /// The server URL cannot be turned into a WebSocket request.
    #[error("invalid relay url {url}: {reason}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The relay refused the upgrade or could not be reached.
    #[error("relay connection failed: {0}")]
    Connect(String),
}

/// Derive the relay WebSocket URL from its HTTP base URL.
///
/// `http://host:8080` becomes `ws://host:8080/api/ws`; `https` maps to `wss`.
pub fn relay_ws_url(server_url: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}{}", base, RELAY_WS_PATH)
}

/// Dial the relay at `server_url` as the holder of `token`.
pub async fn connect_upstream(
    server_url: &str,
    token: &str,
) -> Result<(UpstreamReader, UpstreamWriter), DialError> {
    let url = relay_ws_url(server_url);
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| DialError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;

    let bearer = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
        DialError::InvalidUrl {
            url: url.clone(),
            reason: format!("token is not a valid header value: {}", e),
        }
    })?;
    request.headers_mut().insert("Authorization", bearer);

    let (stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| DialError::Connect(e.to_string()))?;
    tracing::debug!("Connected upstream to {}", url);

    let (sink, stream) = stream.split();
    Ok((
        UpstreamReader { stream },
        UpstreamWriter {
            sink,
            closed: false,
        },
    ))
}

/// Read half of the upstream connection.
pub struct UpstreamReader {
    stream: SplitStream<WsStream>,
}

/// Write half of the upstream connection.
pub struct UpstreamWriter {
    sink: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait]
impl FrameReader for UpstreamReader {
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
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }
}

#[async_trait]
impl FrameWriter for UpstreamWriter {
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
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_from_http() {
        assert_eq!(
            relay_ws_url("http://localhost:8080"),
            "ws://localhost:8080/api/ws"
        );
        assert_eq!(
            relay_ws_url("https://relay.example.com/"),
            "wss://relay.example.com/api/ws"
        );
        assert_eq!(relay_ws_url("ws://10.0.0.1:9000"), "ws://10.0.0.1:9000/api/ws");
    }

    #[tokio::test]
    async fn dial_failure_is_reported() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect_upstream(&format!("http://{}", addr), "token").await;
        assert!(matches!(result, Err(DialError::Connect(_))));
    }

    #[tokio::test]
    async fn garbage_url_is_invalid() {
        let result = connect_upstream("not a url", "token").await;
        assert!(matches!(result, Err(DialError::InvalidUrl { .. })));
    }
}
