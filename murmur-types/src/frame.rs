//! Relay frames for the Murmur real-time protocol.
//!
//! Frames are JSON objects discriminated by a `type` tag:
//!
//! ```json
//! { "type": "message", "receiver_id": 2, "content": "<base64 envelope>" }
//! { "type": "message_sent", "message_id": 17, "content": "Message sent successfully" }
//! { "type": "error", "content": "Failed to save message" }
//! { "type": "ping" }
//! ```
//!
//! Unrecognized `type` values decode to [`RelayFrame::Unknown`] so newer peers
//! can introduce frame kinds without breaking older ones.

use serde::{Deserialize, Serialize};

use crate::{FrameError, MessageId, UserId};

/// Acknowledgement text carried by `message_sent` frames.
pub const MESSAGE_SENT_TEXT: &str = "Message sent successfully";

/// All frames exchanged over a relay connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    /// A direct message (client → relay, or relay → recipient)
    Message(MessageFrame),
    /// Delivery acknowledgement sent back to the sender
    MessageSent(MessageSent),
    /// Human-readable failure report
    Error(ErrorFrame),
    /// Liveness probe
    Ping,
    /// Reply to a liveness probe
    Pong,
    /// Any frame kind this build does not recognize
    #[serde(other, skip_serializing)]
    Unknown,
}

impl RelayFrame {
    /// Decode a frame from its JSON text form.
    pub fn from_json(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(FrameError::Malformed)
    }

    /// Encode this frame as JSON text.
    pub fn to_json(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Serialization)
    }

    /// Build an `error` frame with the given reason.
    pub fn error(reason: impl Into<String>) -> Self {
        RelayFrame::Error(ErrorFrame {
            content: reason.into(),
        })
    }

    /// Build a `message_sent` acknowledgement for a persisted message.
    pub fn message_sent(message_id: MessageId) -> Self {
        RelayFrame::MessageSent(MessageSent {
            message_id: Some(message_id),
            content: Some(MESSAGE_SENT_TEXT.to_string()),
        })
    }

    /// Short name of the frame kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayFrame::Message(_) => "message",
            RelayFrame::MessageSent(_) => "message_sent",
            RelayFrame::Error(_) => "error",
            RelayFrame::Ping => "ping",
            RelayFrame::Pong => "pong",
            RelayFrame::Unknown => "unknown",
        }
    }
}

/// A direct message frame.
///
/// `content` is opaque to the relay. Between the proxy and the relay it holds
/// a base64 encrypted envelope; between the proxy and the UI it holds
/// plaintext.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFrame {
    /// Intended recipient
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    /// Originating user (set by the relay on delivery)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    /// Message body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Durable id (set by the relay on delivery)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// RFC 3339 timestamp (set by the relay on delivery)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl MessageFrame {
    /// Content as a string slice, empty when absent.
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Delivery acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSent {
    /// Durable id of the acknowledged message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// Acknowledgement text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Failure report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Reason text
    #[serde(default)]
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_frame_omits_absent_fields() {
        let frame = RelayFrame::Message(MessageFrame {
            receiver_id: Some(UserId::new(2)),
            content: Some("hi".into()),
            ..Default::default()
        });

        let json = frame.to_json().unwrap();
        assert_eq!(json, r#"{"type":"message","receiver_id":2,"content":"hi"}"#);
    }

    #[test]
    fn decodes_ui_message() {
        let frame = RelayFrame::from_json(r#"{"type":"message","receiver_id":5,"content":"yo"}"#)
            .unwrap();

        match frame {
            RelayFrame::Message(m) => {
                assert_eq!(m.receiver_id, Some(UserId::new(5)));
                assert_eq!(m.content_str(), "yo");
                assert!(m.sender_id.is_none());
                assert!(m.message_id.is_none());
            }
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn control_frames_have_bare_shape() {
        assert_eq!(RelayFrame::Ping.to_json().unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(RelayFrame::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
        assert_eq!(
            RelayFrame::from_json(r#"{"type":"ping"}"#).unwrap(),
            RelayFrame::Ping
        );
    }

    #[test]
    fn ping_with_extra_fields_still_decodes() {
        let frame = RelayFrame::from_json(r#"{"type":"ping","content":"x"}"#).unwrap();
        assert_eq!(frame, RelayFrame::Ping);
    }

    #[test]
    fn unknown_type_is_absorbed() {
        let frame = RelayFrame::from_json(r#"{"type":"typing","receiver_id":3}"#).unwrap();
        assert_eq!(frame, RelayFrame::Unknown);
        assert_eq!(frame.kind(), "unknown");
    }

    #[test]
    fn unknown_frame_cannot_be_sent() {
        assert!(matches!(
            RelayFrame::Unknown.to_json(),
            Err(FrameError::Serialization(_))
        ));
    }

    #[test]
    fn missing_type_is_malformed() {
        let result = RelayFrame::from_json(r#"{"content":"hello"}"#);
        assert!(matches!(result, Err(FrameError::Malformed(_))));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            RelayFrame::from_json("not json"),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn message_sent_carries_ack_text() {
        let json = RelayFrame::message_sent(MessageId::new(17)).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"type":"message_sent","message_id":17,"content":"Message sent successfully"}"#
        );
    }

    #[test]
    fn error_frame_shape() {
        let json = RelayFrame::error("Failed to save message").to_json().unwrap();
        assert_eq!(json, r#"{"type":"error","content":"Failed to save message"}"#);
    }

    #[test]
    fn delivered_message_decodes_all_fields() {
        let text = r#"{"type":"message","sender_id":1,"receiver_id":2,"content":"abc",
            "message_id":99,"timestamp":"2026-01-01T00:00:00Z"}"#;
        let RelayFrame::Message(m) = RelayFrame::from_json(text).unwrap() else {
            panic!("expected message");
        };
        assert_eq!(m.sender_id, Some(UserId::new(1)));
        assert_eq!(m.message_id, Some(MessageId::new(99)));
        assert_eq!(m.timestamp.as_deref(), Some("2026-01-01T00:00:00Z"));
    }
}
