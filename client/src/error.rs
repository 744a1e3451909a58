//! Error types for the transport, the session and user-visible connection failures

use std::io;
use thiserror::Error;

/// Longest error text kept for display
pub const MAX_ERROR_TEXT_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no route to {0}")]
    Unroutable(String),

    #[error("unknown connection handle {0}")]
    UnknownHandle(u32),

    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected to a server")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to encode message: {0}")]
    Encode(#[from] bincode::Error),
}

/// Every way a connection can end that the player gets told about
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionFailure {
    #[error("Unable to reach game server ({0})")]
    TransportEstablishment(String),

    #[error("Timed out connecting to game server")]
    HandshakeTimeout,

    #[error("Connection failure: {0}")]
    AuthenticationRejected(String),

    #[error("Game server connection failure")]
    LivenessLost,

    #[error("Game server has exited")]
    ServerExiting,

    #[error("{0}")]
    Matchmaking(String),
}

/// Cuts `text` down to `MAX_ERROR_TEXT_LEN` characters.
pub fn bounded_error_text(text: &str) -> String {
    text.chars().take(MAX_ERROR_TEXT_LEN).collect()
}
