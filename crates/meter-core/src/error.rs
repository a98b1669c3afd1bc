//! Error types for the meter session

use thiserror::Error;

/// Errors surfaced by the meter session and its engines
#[derive(Error, Debug)]
pub enum MeterError {
    /// Malformed wire data or an attribute type mismatch
    #[error("Codec error: {0}")]
    Codec(#[from] zcl_protocol::ZclError),

    /// No correlated response arrived within the deadline
    #[error("Request timeout")]
    Timeout,

    /// The operation requires an active server binding
    #[error("Not joined to a meter")]
    NotJoined,

    /// The radio transport rejected the send
    #[error("Transport error: {0}")]
    Transport(String),

    /// No image transfer is in progress
    #[error("No active OTA transfer")]
    NoActiveTransfer,
}
