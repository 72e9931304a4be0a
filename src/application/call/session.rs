//! Call session aggregate
//!
//! Everything the controller knows about the current call. Exactly one lives
//! at a time, behind the controller's `Option<CallSession>`; taking it out of
//! the slot and calling [`CallSession::teardown`] is the only way a call ends.

use crate::application::peer_session::PeerSession;
use crate::domain::call::{CallInput, CallKind, CallRole, CallState, Transition};
use crate::domain::media::MediaStream;
use crate::domain::shared::value_objects::{CallId, ParticipantId};
use crate::domain::signaling::{IceCandidate, SessionDescription};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::debug;

/// Observable view of the controller, published on every change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub state: CallState,
    pub call_id: Option<CallId>,
    pub kind: Option<CallKind>,
    pub role: Option<CallRole>,
    pub remote_user: Option<ParticipantId>,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
    pub muted: bool,
    pub video_enabled: bool,
}

pub struct CallSession {
    call_id: CallId,
    kind: CallKind,
    role: CallRole,
    remote_user: ParticipantId,
    state: CallState,
    peer: Option<PeerSession>,
    remote_offer: Option<SessionDescription>,
    /// Remote candidates received before a peer session exists
    early_candidates: Vec<IceCandidate>,
    started_at: Option<DateTime<Utc>>,
    active_since: Option<Instant>,
    /// Accept in progress; still `Incoming` until the answer is sent
    answering: bool,
    ring_cancel: Option<oneshot::Sender<()>>,
    shutdown: watch::Sender<bool>,
}

impl CallSession {
    fn new(call_id: CallId, kind: CallKind, role: CallRole, remote_user: ParticipantId) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            call_id,
            kind,
            role,
            remote_user,
            state: CallState::Idle,
            peer: None,
            remote_offer: None,
            early_candidates: Vec::new(),
            started_at: None,
            active_since: None,
            answering: false,
            ring_cancel: None,
            shutdown,
        }
    }

    /// Local proposal, already in `Calling`
    pub fn outgoing(call_id: CallId, to: ParticipantId, kind: CallKind) -> Self {
        let mut session = Self::new(call_id, kind, CallRole::Initiator, to);
        session.apply(CallInput::Start);
        session
    }

    /// Remote proposal, already in `Incoming`
    pub fn incoming(
        call_id: CallId,
        from: ParticipantId,
        kind: CallKind,
        offer: SessionDescription,
    ) -> Self {
        let mut session = Self::new(call_id, kind, CallRole::Receiver, from);
        session.remote_offer = Some(offer);
        session.apply(CallInput::RemoteOffer);
        session
    }

    /// Feed an input to the state machine and move if it says so
    pub fn apply(&mut self, input: CallInput) -> Transition {
        let transition = self.state.on(input);
        if let Transition::Enter(next) = transition {
            debug_assert!(
                self.state.can_transition_to(next),
                "{} -> {} is not a call transition",
                self.state,
                next
            );
            debug!(
                "Call {}: {} -> {} on {:?}",
                self.call_id, self.state, next, input
            );
            self.state = next;
        }
        transition
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn remote_user(&self) -> &ParticipantId {
        &self.remote_user
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_answering(&self) -> bool {
        self.answering
    }

    pub fn set_answering(&mut self, answering: bool) {
        self.answering = answering;
    }

    pub fn take_remote_offer(&mut self) -> Option<SessionDescription> {
        self.remote_offer.take()
    }

    pub fn buffer_candidate(&mut self, candidate: IceCandidate) {
        self.early_candidates.push(candidate);
    }

    pub fn early_candidate_count(&self) -> usize {
        self.early_candidates.len()
    }

    /// Store the peer session; returns it with the early candidates that must
    /// be handed to it
    pub fn install_peer(&mut self, peer: PeerSession) -> (&mut PeerSession, Vec<IceCandidate>) {
        let early = std::mem::take(&mut self.early_candidates);
        (self.peer.insert(peer), early)
    }

    pub fn peer(&self) -> Option<&PeerSession> {
        self.peer.as_ref()
    }

    pub fn peer_mut(&mut self) -> Option<&mut PeerSession> {
        self.peer.as_mut()
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.peer
            .as_ref()
            .and_then(|peer| peer.local_media())
            .map(|media| media.stream().clone())
    }

    pub fn remote_stream(&self) -> Option<MediaStream> {
        self.peer.as_ref().map(|peer| peer.remote_stream().clone())
    }

    pub fn arm_ring_timer(&mut self, cancel: oneshot::Sender<()>) {
        self.ring_cancel = Some(cancel);
    }

    /// Dropping the sender wakes the timer task, which then exits
    pub fn cancel_ring_timer(&mut self) {
        self.ring_cancel = None;
    }

    /// Receiver that flips to `true` when the session is torn down
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn mark_active(&mut self, now: Instant) {
        if self.active_since.is_none() {
            self.active_since = Some(now);
            self.started_at = Some(Utc::now());
        }
    }

    /// Whole seconds since the call became active
    pub fn elapsed_seconds(&self, now: Instant) -> Option<u64> {
        self.active_since
            .map(|since| now.saturating_duration_since(since).as_secs())
    }

    pub fn snapshot(&self, now: Instant) -> CallSnapshot {
        let media = self.peer.as_ref().and_then(|peer| peer.local_media());
        CallSnapshot {
            state: self.state,
            call_id: Some(self.call_id),
            kind: Some(self.kind),
            role: Some(self.role),
            remote_user: Some(self.remote_user.clone()),
            started_at: self.started_at,
            elapsed_seconds: self.elapsed_seconds(now).unwrap_or(0),
            muted: media.map(|m| m.is_muted()).unwrap_or(false),
            video_enabled: media.map(|m| m.is_video_enabled()).unwrap_or(false),
        }
    }

    /// Stop timers, close the peer session and release every track
    pub async fn teardown(&mut self) {
        self.shutdown.send_replace(true);
        self.ring_cancel = None;
        self.early_candidates.clear();
        self.remote_offer = None;
        self.answering = false;
        if let Some(peer) = self.peer.as_mut() {
            peer.close().await;
        }
        self.state = CallState::Idle;
    }
}
