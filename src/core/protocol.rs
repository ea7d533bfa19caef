//! Wire messages exchanged with clients and with Deepgram.
//!
//! Client-facing JSON (acknowledgments and error notices) and upstream control
//! messages are fixed shapes; transcripts coming back from Deepgram are never
//! parsed and are relayed as opaque frames.

use bytes::Bytes;
use serde::Serialize;

/// WebSocket close statuses used when the relay ends a session.
///
/// The same values are carried in the `code` field of [`ErrorNotice`].
pub mod close_code {
    /// Client closed or session finished normally
    pub const NORMAL: u16 = 1000;
    /// Relay is shutting down
    pub const GOING_AWAY: u16 = 1001;
    /// Upstream could not be (re)established or closed for good
    pub const UPSTREAM_UNAVAILABLE: u16 = 1011;
    /// No forwarded traffic for longer than the idle threshold
    pub const IDLE_TIMEOUT: u16 = 4000;
    /// Session reached its maximum lifetime
    pub const SAFETY_TIMEOUT: u16 = 4001;
}

/// Largest close reason that fits a control frame after the 2-byte code
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

/// Cut `text` to fit a close frame, keeping whole characters
pub fn close_reason(text: &str) -> String {
    if text.len() <= MAX_CLOSE_REASON_BYTES {
        return text.to_string();
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// A frame as received from the client or from upstream, payload untouched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sent to the client after a language control frame is applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigAck {
    pub config_received: bool,
    pub language: String,
}

impl ConfigAck {
    pub fn new(language: &str) -> Self {
        Self {
            config_received: true,
            language: language.to_string(),
        }
    }
}

/// Best-effort notice sent to the client before the relay closes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorNotice {
    pub error: bool,
    pub message: String,
    pub code: u16,
}

impl ErrorNotice {
    pub fn new(message: impl Into<String>, code: u16) -> Self {
        Self {
            error: true,
            message: message.into(),
            code,
        }
    }
}

/// Control messages understood by the Deepgram listen socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum UpstreamControl {
    KeepAlive,
    CloseStream,
}

impl UpstreamControl {
    pub fn to_json(self) -> String {
        match self {
            UpstreamControl::KeepAlive => r#"{"type":"KeepAlive"}"#.to_string(),
            UpstreamControl::CloseStream => r#"{"type":"CloseStream"}"#.to_string(),
        }
    }
}

/// Routed to the client writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRoute {
    /// Relay a frame unchanged
    Frame(Frame),
    /// Serialize and send a relay-generated JSON message
    Json(String),
    /// Send a close frame and stop writing
    Close { code: u16, reason: String },
}

impl ClientRoute {
    /// Serialize a relay message for the client
    pub fn json<T: Serialize>(message: &T) -> Option<Self> {
        match serde_json::to_string(message) {
            Ok(json) => Some(ClientRoute::Json(json)),
            Err(e) => {
                tracing::error!("Failed to serialize client message: {}", e);
                None
            }
        }
    }
}
