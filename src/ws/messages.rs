//! WebSocket frame types exchanged between the socket tasks and the
//! connection manager.

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message};

use crate::error::GatewayError;

/// Close code used for policy rejections (CORS, authorization).
pub const CLOSE_POLICY: u16 = 3000;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// A data frame received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Text frame.
    Text(String),
    /// Binary frame, expected to hold UTF-8 JSON.
    Binary(Vec<u8>),
}

impl InboundFrame {
    /// Normalizes the frame to text.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidFrame`] when a binary frame is not
    /// valid UTF-8.
    pub fn into_text(self) -> Result<String, GatewayError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Binary(bytes) => String::from_utf8(bytes)
                .map_err(|err| GatewayError::InvalidFrame(err.to_string())),
        }
    }
}

/// A frame queued for the connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Text frame.
    Text(String),
    /// Heartbeat ping.
    Ping,
    /// Close handshake. The writer stops after sending it.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

impl OutboundFrame {
    /// Returns `true` for the close frame.
    #[must_use]
    pub const fn is_close(&self) -> bool {
        matches!(self, Self::Close { .. })
    }

    /// Converts into an axum WebSocket message.
    #[must_use]
    pub fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::text(text),
            Self::Ping => Message::Ping(Bytes::new()),
            Self::Close { code, reason } => Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
        }
    }
}
