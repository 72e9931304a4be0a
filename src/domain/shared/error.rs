//! Call errors

use thiserror::Error;

/// Failure taxonomy of the call subsystem
///
/// Every variant is handled inside the controller by forcing the call back to
/// idle; intents still return it so callers can tell what happened.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Media denied: {0}")]
    MediaDenied(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Busy")]
    Busy,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Call was cancelled before setup completed")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),
}
