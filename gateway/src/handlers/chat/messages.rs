//! Chat WebSocket message types and the turn codec
//!
//! Inbound frames are JSON records discriminated by `type` (`audio`, `text`,
//! `ping`). Outbound frames are produced from [`ServerEvent`] values.

use base64::prelude::*;
use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

use crate::core::conversation::TurnContent;

/// Maximum allowed size for text turns (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

/// Maximum allowed size of the base64 `audio_data` field (10 MB)
pub const MAX_AUDIO_BASE64_SIZE: usize = 10 * 1024 * 1024;

/// MIME type assumed when an audio frame does not carry one
pub const DEFAULT_AUDIO_MIME_TYPE: &str = "audio/webm";

// =============================================================================
// Errors
// =============================================================================

/// Errors produced while decoding an inbound frame.
///
/// None of these are fatal: the client receives an `error` event and the
/// connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Unknown `type` or malformed structure
    #[error("Invalid message format: {0}")]
    UnknownFrame(String),

    /// `audio_data` is not valid base64 or decodes to nothing
    #[error("Invalid audio encoding: {0}")]
    InvalidEncoding(String),

    /// A payload exceeds its size limit
    #[error("{field} too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge {
        field: &'static str,
        size: usize,
        max: usize,
    },

    /// Frames arrived while the pending queue was full and were discarded
    #[error("Too many pending messages: {dropped} dropped")]
    Backlog { dropped: usize },
}

// =============================================================================
// Incoming Frames (Client -> Server)
// =============================================================================

/// One inbound transport frame, independent of the WebSocket library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame
    Text(String),
    /// Binary frame (not part of the protocol)
    Binary(Bytes),
    /// The client closed the connection
    Close,
}

/// Wire shape of inbound messages
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum IncomingMessage {
    #[serde(rename = "audio")]
    Audio {
        audio_data: String,
        #[serde(default)]
        mime_type: Option<String>,
    },

    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: Option<String>,
    },

    #[serde(rename = "ping")]
    Ping,
}

/// A decoded client turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    /// Recorded audio
    Audio { data: Bytes, mime_type: String },
    /// Typed text
    Text(String),
    /// Keepalive; never reaches the upstream conversation
    Ping,
}

impl Turn {
    /// Content to forward upstream, `None` for keepalives.
    pub fn into_content(self) -> Option<TurnContent> {
        match self {
            Turn::Audio { data, mime_type } => Some(TurnContent::Audio { data, mime_type }),
            Turn::Text(text) => Some(TurnContent::Text(text)),
            Turn::Ping => None,
        }
    }
}

/// Decode one JSON text frame into a [`Turn`].
pub fn decode(raw: &str) -> Result<Turn, ProtocolError> {
    let message: IncomingMessage =
        serde_json::from_str(raw).map_err(|e| ProtocolError::UnknownFrame(e.to_string()))?;

    match message {
        IncomingMessage::Audio {
            audio_data,
            mime_type,
        } => {
            if audio_data.len() > MAX_AUDIO_BASE64_SIZE {
                return Err(ProtocolError::PayloadTooLarge {
                    field: "Audio",
                    size: audio_data.len(),
                    max: MAX_AUDIO_BASE64_SIZE,
                });
            }

            let data = BASE64_STANDARD
                .decode(audio_data.trim())
                .map_err(|e| ProtocolError::InvalidEncoding(e.to_string()))?;
            if data.is_empty() {
                return Err(ProtocolError::InvalidEncoding(
                    "audio_data is empty".to_string(),
                ));
            }

            let mime_type = mime_type
                .filter(|mime| !mime.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_AUDIO_MIME_TYPE.to_string());

            Ok(Turn::Audio {
                data: Bytes::from(data),
                mime_type,
            })
        }
        IncomingMessage::Text { text } => {
            let text = text.unwrap_or_default();
            if text.len() > MAX_TEXT_SIZE {
                return Err(ProtocolError::PayloadTooLarge {
                    field: "Text",
                    size: text.len(),
                    max: MAX_TEXT_SIZE,
                });
            }
            Ok(Turn::Text(text))
        }
        IncomingMessage::Ping => Ok(Turn::Ping),
    }
}

/// Decode any transport frame. Binary frames are not part of the protocol.
pub fn decode_frame(frame: &Frame) -> Result<Turn, ProtocolError> {
    match frame {
        Frame::Text(raw) => decode(raw),
        Frame::Binary(data) => Err(ProtocolError::UnknownFrame(format!(
            "binary frames are not supported ({} bytes)",
            data.len()
        ))),
        Frame::Close => Err(ProtocolError::UnknownFrame("close frame".to_string())),
    }
}

// =============================================================================
// Outgoing Events (Server -> Client)
// =============================================================================

/// Events the server sends to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// One fragment of the reply
    Chunk { text: String },
    /// The reply completed successfully
    End,
    /// The turn failed, or an inbound frame was rejected
    Error { message: String },
    /// Reply to a ping
    Pong,
}

impl ServerEvent {
    /// Error event carrying the display form of `err`.
    pub fn error(err: impl std::fmt::Display) -> Self {
        ServerEvent::Error {
            message: err.to_string(),
        }
    }

    /// Whether this event ends a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerEvent::End | ServerEvent::Error { .. })
    }

    /// Wire `type` of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Chunk { .. } => "response_chunk",
            ServerEvent::End => "response_end",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong => "pong",
        }
    }

    /// Encode as one JSON text frame.
    pub fn encode(&self) -> String {
        let value = match self {
            ServerEvent::Chunk { text } => {
                serde_json::json!({ "type": self.kind(), "text": text })
            }
            ServerEvent::Error { message } => {
                serde_json::json!({ "type": self.kind(), "message": message })
            }
            ServerEvent::End | ServerEvent::Pong => serde_json::json!({ "type": self.kind() }),
        };
        value.to_string()
    }
}
