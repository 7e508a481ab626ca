//! Error type for the browser-facing bridge handler.

use thiserror::Error;

use crate::core::session::SessionError;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The opening handshake frame was missing, malformed, or declared an
    /// unsupported format.
    #[error("first message must be a {{\"type\":\"start\"}} text frame: {0}")]
    InvalidStart(String),

    #[error("timed out waiting for the start message")]
    StartTimeout,

    #[error("browser read timed out")]
    ReadTimeout,

    #[error("browser write timed out")]
    WriteTimeout,

    #[error("browser socket: {0}")]
    Socket(String),

    #[error("encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Session(#[from] SessionError),
}
