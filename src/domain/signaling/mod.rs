//! Signaling context - the message envelope and the relay transport port

pub mod message;

use crate::domain::shared::value_objects::ConversationId;
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub use message::{IceCandidate, SdpType, SessionDescription, SignalingMessage, SignalingPayload};

/// Stream of every message broadcast on one conversation
pub type SignalingStream = BoxStream<'static, SignalingMessage>;

/// Relay transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Relay link closed")]
    Closed,

    #[error("Failed to connect to relay: {0}")]
    Connect(String),

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Failed to send message: {0}")]
    Send(String),
}

/// Per-conversation publish/subscribe relay
///
/// Supplied by the messaging subsystem. Subscribers receive every message
/// published on the conversation, including their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Publish a message to every subscriber of the conversation
    async fn publish(
        &self,
        conversation: &ConversationId,
        message: &SignalingMessage,
    ) -> Result<(), TransportError>;

    /// Subscribe to the conversation
    async fn subscribe(
        &self,
        conversation: &ConversationId,
    ) -> Result<SignalingStream, TransportError>;
}
