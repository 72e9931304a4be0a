//! Signaling message envelope
//!
//! Versionless JSON shape shared by both peers:
//! `{ "type", "callId", "fromUserId", "toUserId", ...payload }`.

use crate::domain::call::value_object::CallKind;
use crate::domain::shared::value_objects::{CallId, ParticipantId};
use serde::{Deserialize, Serialize};

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session description exchanged in offer/answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Network path descriptor trickled between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

/// Kind-specific part of a signaling message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalingPayload {
    #[serde(rename_all = "camelCase")]
    Offer {
        offer: SessionDescription,
        call_kind: CallKind,
    },
    Answer {
        answer: SessionDescription,
    },
    IceCandidate {
        candidate: IceCandidate,
    },
    End,
    Reject,
}

/// Addressed signaling message for one call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    pub call_id: CallId,
    pub from_user_id: ParticipantId,
    pub to_user_id: ParticipantId,
    #[serde(flatten)]
    pub payload: SignalingPayload,
}

impl SignalingMessage {
    pub fn new(
        call_id: CallId,
        from: ParticipantId,
        to: ParticipantId,
        payload: SignalingPayload,
    ) -> Self {
        Self {
            call_id,
            from_user_id: from,
            to_user_id: to,
            payload,
        }
    }

    pub fn offer(
        call_id: CallId,
        from: ParticipantId,
        to: ParticipantId,
        offer: SessionDescription,
        call_kind: CallKind,
    ) -> Self {
        Self::new(call_id, from, to, SignalingPayload::Offer { offer, call_kind })
    }

    pub fn answer(
        call_id: CallId,
        from: ParticipantId,
        to: ParticipantId,
        answer: SessionDescription,
    ) -> Self {
        Self::new(call_id, from, to, SignalingPayload::Answer { answer })
    }

    pub fn ice_candidate(
        call_id: CallId,
        from: ParticipantId,
        to: ParticipantId,
        candidate: IceCandidate,
    ) -> Self {
        Self::new(call_id, from, to, SignalingPayload::IceCandidate { candidate })
    }

    pub fn end(call_id: CallId, from: ParticipantId, to: ParticipantId) -> Self {
        Self::new(call_id, from, to, SignalingPayload::End)
    }

    pub fn reject(call_id: CallId, from: ParticipantId, to: ParticipantId) -> Self {
        Self::new(call_id, from, to, SignalingPayload::Reject)
    }

    /// Wire name of the message type
    pub fn type_name(&self) -> &'static str {
        match self.payload {
            SignalingPayload::Offer { .. } => "offer",
            SignalingPayload::Answer { .. } => "answer",
            SignalingPayload::IceCandidate { .. } => "ice-candidate",
            SignalingPayload::End => "end",
            SignalingPayload::Reject => "reject",
        }
    }

    /// Addressed to `me` and not sent by `me`
    pub fn is_addressed_to(&self, me: &ParticipantId) -> bool {
        &self.to_user_id == me && &self.from_user_id != me
    }
}
