//! Error types for transport access and register decoding.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to the inverter over Modbus/TCP.
///
/// All of these are expected, recoverable conditions: the hub logs them,
/// skips the current tick and retries on the next one.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    #[error("Connection to {addr} failed: {message}")]
    Connect { addr: String, message: String },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Client is not connected")]
    NotConnected,

    #[error("Modbus request failed: {0}")]
    Modbus(String),

    #[error("Device answered with exception: {0}")]
    Exception(String),

    #[error("Short response: expected {expected} registers, received {received}")]
    ShortResponse { expected: usize, received: usize },
}

impl TransportError {
    /// Whether this error means the underlying socket can no longer be trusted.
    ///
    /// Exception and short responses come from a live peer, so the
    /// connection is kept; everything else forces a reconnect.
    pub fn is_connection_lost(&self) -> bool {
        !matches!(
            self,
            TransportError::Exception(_) | TransportError::ShortResponse { .. }
        )
    }
}

/// Errors raised while turning a register window into a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Block '{block}' too short: expected {expected} registers, received {received}")]
    ShortWindow {
        block: &'static str,
        expected: usize,
        received: usize,
    },

    #[error("Missing register window for block '{block}'")]
    MissingBlock { block: &'static str },
}

/// Failure of a single poll tick.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
