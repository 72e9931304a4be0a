//! Call domain events

use crate::domain::call::value_object::{CallKind, EndReason};
use crate::domain::shared::events::{DomainEvent, EventMetadata};
use crate::domain::shared::value_objects::{CallId, ParticipantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event published by the call controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEvent {
    pub metadata: EventMetadata,
    pub call_id: CallId,
    pub kind: CallEventKind,
}

/// What happened to the call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEventKind {
    /// Local user proposed a call
    Proposed { to: ParticipantId, call_kind: CallKind },
    /// A remote offer is waiting for accept/decline
    Incoming { from: ParticipantId, call_kind: CallKind },
    /// First remote media arrived
    Connected,
    /// Call went back to idle
    Ended {
        reason: EndReason,
        duration_seconds: Option<u64>,
    },
}

impl CallEvent {
    pub fn new(call_id: CallId, kind: CallEventKind) -> Self {
        Self {
            metadata: EventMetadata::now(),
            call_id,
            kind,
        }
    }

    /// User-visible notice carried by an `Ended` event
    pub fn notice(&self) -> Option<&'static str> {
        match &self.kind {
            CallEventKind::Ended { reason, .. } => reason.notice(),
            _ => None,
        }
    }
}

impl DomainEvent for CallEvent {
    fn event_type(&self) -> &'static str {
        match self.kind {
            CallEventKind::Proposed { .. } => "call.proposed",
            CallEventKind::Incoming { .. } => "call.incoming",
            CallEventKind::Connected => "call.connected",
            CallEventKind::Ended { .. } => "call.ended",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata.occurred_at
    }
}
