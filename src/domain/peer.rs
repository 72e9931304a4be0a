//! Peer-to-peer negotiation primitive port
//!
//! Whatever native peer connection the platform offers is adapted to
//! [`PeerConnection`]. Asynchronous callbacks of the primitive are delivered
//! as [`PeerEvent`]s on the channel handed to the factory.

use crate::domain::media::MediaTrack;
use crate::domain::signaling::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Connection state reported by the primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    /// No automatic recovery is attempted from these
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PeerConnectionState::Disconnected
                | PeerConnectionState::Failed
                | PeerConnectionState::Closed
        )
    }
}

/// Callback raised by the primitive
pub enum PeerEvent {
    /// Local ICE candidate to trickle to the remote side
    LocalCandidate(IceCandidate),
    /// Remote media arrived
    RemoteTrack(Arc<dyn MediaTrack>),
    ConnectionState(PeerConnectionState),
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            PeerEvent::RemoteTrack(t) => f.debug_tuple("RemoteTrack").field(&t.id()).finish(),
            PeerEvent::ConnectionState(s) => f.debug_tuple("ConnectionState").field(s).finish(),
        }
    }
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

/// Negotiation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Invalid candidate: {0}")]
    Candidate(String),

    #[error("Track error: {0}")]
    Track(String),

    #[error("Peer connection closed")]
    Closed,

    #[error("Peer backend error: {0}")]
    Backend(String),
}

/// Offer/answer plus ICE negotiation primitive
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach a local track so it is negotiated and sent
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerError>;

    /// Create an offer and apply it as the local description
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    /// Create an answer to the applied remote offer and apply it locally
    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    async fn close(&self) -> Result<(), PeerError>;
}

/// Builds peer connections that report to the given event channel
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, events: PeerEventSender) -> Result<Arc<dyn PeerConnection>, PeerError>;
}
