//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of call, fixed for the lifetime of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Voice,
    Video,
}

impl CallKind {
    /// Whether a camera track is requested and rendered
    pub fn wants_video(&self) -> bool {
        matches!(self, CallKind::Video)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Voice => "voice",
            CallKind::Video => "video",
        }
    }
}

/// Which side of the call this endpoint is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallRole {
    /// Minted the call id and sent the offer
    Initiator,
    /// Received the offer
    Receiver,
}

/// Call state as observed by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// No call
    #[default]
    Idle,
    /// An offer was received and is waiting for the user
    Incoming,
    /// Local offer sent, waiting for the answer
    Calling,
    /// Descriptions exchanged, waiting for the first remote media
    Connecting,
    /// Media is flowing
    Active,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Incoming => "incoming",
            CallState::Calling => "calling",
            CallState::Connecting => "connecting",
            CallState::Active => "active",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, CallState::Idle)
    }

    /// States bounded by the ring timeout
    pub fn is_ringing(&self) -> bool {
        matches!(self, CallState::Incoming | CallState::Calling)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason a call went back to idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Local user hung up or cancelled
    LocalHangup,
    /// Remote side sent `end`
    RemoteHangup,
    /// Local user declined an incoming call
    Rejected,
    /// Remote side declined or was busy
    Declined,
    /// Outgoing call was not answered in time
    NoAnswer,
    /// Incoming call was not answered in time
    Missed,
    /// Microphone or camera could not be acquired
    MediaDenied,
    /// A session description could not be applied
    NegotiationFailed,
    /// The peer connection failed, disconnected or closed
    ConnectionLost,
}

impl EndReason {
    /// Transient notice shown to the user, if any
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            EndReason::LocalHangup | EndReason::RemoteHangup | EndReason::ConnectionLost => {
                Some("Call ended")
            }
            EndReason::Declined => Some("Call declined"),
            EndReason::NoAnswer => Some("No answer"),
            EndReason::Missed => Some("Missed call"),
            EndReason::MediaDenied => Some("Unable to access microphone"),
            EndReason::NegotiationFailed => Some("Failed to connect"),
            EndReason::Rejected => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::LocalHangup => "local_hangup",
            EndReason::RemoteHangup => "remote_hangup",
            EndReason::Rejected => "rejected",
            EndReason::Declined => "declined",
            EndReason::NoAnswer => "no_answer",
            EndReason::Missed => "missed",
            EndReason::MediaDenied => "media_denied",
            EndReason::NegotiationFailed => "negotiation_failed",
            EndReason::ConnectionLost => "connection_lost",
        }
    }
}
