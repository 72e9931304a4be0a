//! Call controller
//!
//! Owns "the current call". Local intents and remote signaling both enter
//! here, drive the session state machine, and trigger peer session and
//! signaling actions. Every way out of a call goes through `close_session`.

use super::session::{CallSession, CallSnapshot};
use crate::application::peer_session::{acquire_local_media, PeerSession};
use crate::config::CallConfig;
use crate::domain::call::{CallEvent, CallEventKind, CallInput, CallKind, CallState, EndReason, Transition};
use crate::domain::media::{FacingMode, LocalMediaHandle, MediaDevices, MediaStream, MediaTrack};
use crate::domain::peer::{
    PeerConnectionFactory, PeerConnectionState, PeerError, PeerEvent, PeerEventReceiver,
    PeerEventSender,
};
use crate::domain::shared::error::CallError;
use crate::domain::shared::events::DomainEvent;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, ParticipantId};
use crate::domain::signaling::{SessionDescription, SignalingMessage, SignalingPayload};
use crate::infrastructure::signaling::SignalingChannel;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

type SessionSlot = Option<CallSession>;

/// Session in the slot if it belongs to `call_id` and `from`
fn current<'a>(
    slot: &'a mut SessionSlot,
    call_id: CallId,
    from: &ParticipantId,
) -> Option<&'a mut CallSession> {
    slot.as_mut()
        .filter(|session| session.call_id() == call_id && session.remote_user() == from)
}

/// Whether `input` takes the session back to idle
fn ends_on(session: &CallSession, input: CallInput) -> bool {
    session.state().on(input) == Transition::Enter(CallState::Idle)
}

struct ControllerInner {
    self_id: ParticipantId,
    channel: SignalingChannel,
    devices: Arc<dyn MediaDevices>,
    peers: Arc<dyn PeerConnectionFactory>,
    config: CallConfig,
    session: Mutex<SessionSlot>,
    /// Outgoing signaling, published in order by a background task
    outbox: mpsc::UnboundedSender<SignalingMessage>,
    snapshot: watch::Sender<CallSnapshot>,
    events: broadcast::Sender<CallEvent>,
}

/// One-to-one call orchestrator for a single local user
///
/// Cheap to clone; clones share the same call. Background tasks only hold
/// weak references, so dropping the last clone drops the current session and
/// with it every track and peer connection.
#[derive(Clone)]
pub struct CallController {
    inner: Arc<ControllerInner>,
}

impl CallController {
    /// Must be called from within a Tokio runtime
    pub fn new(
        self_id: ParticipantId,
        channel: SignalingChannel,
        devices: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerConnectionFactory>,
        config: CallConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(CallSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        // Publishing may dial the relay; keep that off the session lock
        let (outbox, mut queued) = mpsc::unbounded_channel::<SignalingMessage>();
        let sender = channel.clone();
        tokio::spawn(async move {
            while let Some(message) = queued.recv().await {
                sender.send(message).await;
            }
        });

        Self {
            inner: Arc::new(ControllerInner {
                self_id,
                channel,
                devices,
                peers,
                config,
                session: Mutex::new(None),
                outbox,
                snapshot,
                events,
            }),
        }
    }

    fn from_inner(inner: Arc<ControllerInner>) -> Self {
        Self { inner }
    }

    pub fn self_id(&self) -> &ParticipantId {
        &self.inner.self_id
    }

    /// Observable state, elapsed time and media flags
    pub fn watch(&self) -> watch::Receiver<CallSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Lifecycle events, including the user-visible notice on end
    pub fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn state(&self) -> CallState {
        self.inner.snapshot.borrow().state
    }

    pub fn call_id(&self) -> Option<CallId> {
        self.inner.snapshot.borrow().call_id
    }

    /// Seconds since the call became active, 0 otherwise
    pub async fn elapsed_seconds(&self) -> u64 {
        let slot = self.inner.session.lock().await;
        slot.as_ref()
            .and_then(|session| session.elapsed_seconds(Instant::now()))
            .unwrap_or(0)
    }

    pub async fn local_stream(&self) -> Option<MediaStream> {
        let slot = self.inner.session.lock().await;
        slot.as_ref().and_then(|session| session.local_stream())
    }

    pub async fn remote_stream(&self) -> Option<MediaStream> {
        let slot = self.inner.session.lock().await;
        slot.as_ref().and_then(|session| session.remote_stream())
    }

    /// Feed every message of the conversation into [`Self::handle_signal`]
    pub async fn listen(&self) -> Result<JoinHandle<()>> {
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .channel
            .on_message(move |message| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        CallController::from_inner(inner)
                            .handle_signal(message)
                            .await;
                    }
                }
            })
            .await
            .map_err(|e| CallError::Transport(e.to_string()))
    }

    // ---------------------------------------------------------------------
    // Local intents
    // ---------------------------------------------------------------------

    /// Propose a call; returns once the offer is sent
    pub async fn start_call(&self, to: ParticipantId, kind: CallKind) -> Result<CallId> {
        if to == self.inner.self_id {
            return Err(CallError::InvalidState("cannot call yourself".to_string()));
        }

        let call_id = CallId::new();
        {
            let mut slot = self.inner.session.lock().await;
            if let Some(current) = slot.as_ref() {
                return Err(CallError::InvalidState(format!(
                    "already {} in call {}",
                    current.state(),
                    current.call_id()
                )));
            }
            *slot = Some(CallSession::outgoing(call_id, to.clone(), kind));
            self.publish(&slot);
        }

        info!("Starting {} call {} to {}", kind.as_str(), call_id, to);
        metrics::counter!("peercall_calls_started_total", "kind" => kind.as_str()).increment(1);
        self.emit(
            call_id,
            CallEventKind::Proposed {
                to: to.clone(),
                call_kind: kind,
            },
        );

        let media = match acquire_local_media(self.inner.devices.as_ref(), kind).await {
            Ok(media) => media,
            Err(e) => {
                warn!("Media for call {} unavailable: {}", call_id, e);
                return Err(self
                    .abort_setup(call_id, EndReason::MediaDenied, false, e)
                    .await);
            }
        };

        let mut slot = self.inner.session.lock().await;
        let Some(session) = slot.as_mut().filter(|s| s.call_id() == call_id) else {
            debug!("Call {} went away during media acquisition", call_id);
            drop(media);
            return Err(CallError::Cancelled);
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let offer = match Self::prepare_offer(self.inner.peers.as_ref(), session, media, events_tx)
            .await
        {
            Ok(offer) => offer,
            Err(e) => {
                warn!("Could not create offer for call {}: {}", call_id, e);
                self.close_session(&mut slot, EndReason::NegotiationFailed)
                    .await;
                return Err(CallError::NegotiationFailed(e.to_string()));
            }
        };

        let (ring_tx, ring_rx) = oneshot::channel();
        session.arm_ring_timer(ring_tx);
        self.spawn_ring_timer(call_id, ring_rx);
        self.spawn_peer_pump(call_id, events_rx, session.shutdown_signal());

        self.send(SignalingMessage::offer(
            call_id,
            self.inner.self_id.clone(),
            to,
            offer,
            kind,
        ));
        self.publish(&slot);
        Ok(call_id)
    }

    async fn prepare_offer(
        peers: &dyn PeerConnectionFactory,
        session: &mut CallSession,
        media: LocalMediaHandle,
        events: PeerEventSender,
    ) -> std::result::Result<SessionDescription, PeerError> {
        let peer = PeerSession::open(peers, events).await?;
        let (peer, early) = session.install_peer(peer);
        peer.attach_local_media(media).await?;
        for candidate in early {
            peer.add_remote_candidate(candidate).await?;
        }
        peer.create_offer().await
    }

    /// Answer the ringing call
    pub async fn accept_incoming_call(&self) -> Result<()> {
        let (call_id, kind) = {
            let mut slot = self.inner.session.lock().await;
            let Some(session) = slot.as_mut() else {
                return Err(CallError::InvalidState("no incoming call".to_string()));
            };
            if session.is_answering()
                || session.state().on(CallInput::Accept)
                    != Transition::Enter(CallState::Connecting)
            {
                return Err(CallError::InvalidState(format!(
                    "cannot accept while {}",
                    session.state()
                )));
            }
            session.set_answering(true);
            session.cancel_ring_timer();
            (session.call_id(), session.kind())
        };

        info!("Accepting call {}", call_id);
        metrics::counter!("peercall_calls_accepted_total").increment(1);

        let media = match acquire_local_media(self.inner.devices.as_ref(), kind).await {
            Ok(media) => media,
            Err(e) => {
                warn!("Media for call {} unavailable: {}", call_id, e);
                return Err(self
                    .abort_setup(call_id, EndReason::MediaDenied, true, e)
                    .await);
            }
        };

        let mut slot = self.inner.session.lock().await;
        let Some(session) = slot
            .as_mut()
            .filter(|s| s.call_id() == call_id && s.state() == CallState::Incoming)
        else {
            debug!("Call {} went away during media acquisition", call_id);
            drop(media);
            return Err(CallError::Cancelled);
        };

        let remote = session.remote_user().clone();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let answer =
            match Self::prepare_answer(self.inner.peers.as_ref(), session, media, events_tx).await {
                Ok(answer) => answer,
                Err(e) => {
                    warn!("Could not answer call {}: {}", call_id, e);
                    self.send(SignalingMessage::end(
                        call_id,
                        self.inner.self_id.clone(),
                        remote,
                    ));
                    self.close_session(&mut slot, EndReason::NegotiationFailed)
                        .await;
                    return Err(CallError::NegotiationFailed(e.to_string()));
                }
            };

        session.set_answering(false);
        session.apply(CallInput::Accept);
        self.spawn_peer_pump(call_id, events_rx, session.shutdown_signal());

        self.send(SignalingMessage::answer(
            call_id,
            self.inner.self_id.clone(),
            remote,
            answer,
        ));
        self.publish(&slot);
        Ok(())
    }

    async fn prepare_answer(
        peers: &dyn PeerConnectionFactory,
        session: &mut CallSession,
        media: LocalMediaHandle,
        events: PeerEventSender,
    ) -> std::result::Result<SessionDescription, PeerError> {
        let offer = session
            .take_remote_offer()
            .ok_or_else(|| PeerError::Negotiation("no remote offer stored".to_string()))?;

        let peer = PeerSession::open(peers, events).await?;
        let (peer, early) = session.install_peer(peer);
        peer.attach_local_media(media).await?;
        // Queued by the peer session until the offer is applied
        for candidate in early {
            peer.add_remote_candidate(candidate).await?;
        }
        peer.create_answer(offer).await
    }

    /// Decline the ringing call; never touches media
    pub async fn reject_incoming_call(&self) -> Result<()> {
        let mut slot = self.inner.session.lock().await;
        let Some(session) = slot.as_ref() else {
            return Err(CallError::InvalidState("no incoming call".to_string()));
        };
        if !ends_on(session, CallInput::Decline) {
            return Err(CallError::InvalidState(format!(
                "cannot reject while {}",
                session.state()
            )));
        }

        info!("Rejecting call {}", session.call_id());
        self.send(SignalingMessage::reject(
            session.call_id(),
            self.inner.self_id.clone(),
            session.remote_user().clone(),
        ));
        self.close_session(&mut slot, EndReason::Rejected).await;
        Ok(())
    }

    /// Hang up or cancel. Idempotent.
    pub async fn end_call(&self, notify_remote: bool) {
        let mut slot = self.inner.session.lock().await;
        let Some(session) = slot.as_ref() else {
            debug!("No call to end");
            return;
        };

        if notify_remote {
            self.send(SignalingMessage::end(
                session.call_id(),
                self.inner.self_id.clone(),
                session.remote_user().clone(),
            ));
        }
        self.close_session(&mut slot, EndReason::LocalHangup).await;
    }

    /// Teardown for when the owner goes away
    pub async fn dispose(&self) {
        self.end_call(true).await;
    }

    /// Mute or unmute the microphone; returns the new muted flag
    pub async fn toggle_mute(&self) -> Result<bool> {
        let slot = self.inner.session.lock().await;
        let media = slot
            .as_ref()
            .and_then(|session| session.peer())
            .and_then(|peer| peer.local_media())
            .ok_or_else(|| CallError::InvalidState("no local media".to_string()))?;

        let muted = !media.is_muted();
        media.set_muted(muted);
        self.publish(&slot);
        Ok(muted)
    }

    /// Turn the camera on or off; returns whether video is now enabled
    pub async fn toggle_video(&self) -> Result<bool> {
        let slot = self.inner.session.lock().await;
        let media = slot
            .as_ref()
            .and_then(|session| session.peer())
            .and_then(|peer| peer.local_media())
            .filter(|media| media.stream().has_video())
            .ok_or_else(|| CallError::InvalidState("no local video".to_string()))?;

        let enabled = !media.is_video_enabled();
        media.set_video_enabled(enabled);
        self.publish(&slot);
        Ok(enabled)
    }

    /// Flip between front and rear camera
    pub async fn switch_camera(&self) -> Result<FacingMode> {
        let mut slot = self.inner.session.lock().await;
        let media = slot
            .as_mut()
            .and_then(|session| session.peer_mut())
            .and_then(|peer| peer.local_media_mut())
            .ok_or_else(|| CallError::InvalidState("no local media".to_string()))?;

        media
            .switch_camera()
            .map_err(|e| CallError::InvalidState(e.to_string()))
    }

    // ---------------------------------------------------------------------
    // Remote signaling
    // ---------------------------------------------------------------------

    /// Dispatch one relay message
    pub async fn handle_signal(&self, message: SignalingMessage) {
        if !message.is_addressed_to(&self.inner.self_id) {
            return;
        }

        match message.payload {
            SignalingPayload::Offer { .. } => self.handle_incoming_offer(message).await,
            SignalingPayload::Answer { .. } => self.handle_answer(message).await,
            SignalingPayload::IceCandidate { .. } => self.handle_ice_candidate(message).await,
            SignalingPayload::End => self.handle_remote_end(message).await,
            SignalingPayload::Reject => self.handle_remote_reject(message).await,
        }
    }

    pub async fn handle_incoming_offer(&self, message: SignalingMessage) {
        if !message.is_addressed_to(&self.inner.self_id) {
            return;
        }
        let SignalingMessage {
            call_id,
            from_user_id: from,
            payload,
            ..
        } = message;
        let SignalingPayload::Offer { offer, call_kind } = payload else {
            return;
        };

        let mut slot = self.inner.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if session.call_id() == call_id {
                debug!("Duplicate offer for call {}", call_id);
                return;
            }
            if session.state().on(CallInput::RemoteOffer) == Transition::Busy {
                info!(
                    "Busy in call {}, rejecting call {} from {}",
                    session.call_id(),
                    call_id,
                    from
                );
                metrics::counter!("peercall_busy_rejects_total").increment(1);
                self.send(SignalingMessage::reject(
                    call_id,
                    self.inner.self_id.clone(),
                    from,
                ));
            }
            return;
        }

        let mut session = CallSession::incoming(call_id, from.clone(), call_kind, offer);
        let (ring_tx, ring_rx) = oneshot::channel();
        session.arm_ring_timer(ring_tx);
        *slot = Some(session);
        self.spawn_ring_timer(call_id, ring_rx);
        self.publish(&slot);

        info!("Incoming {} call {} from {}", call_kind.as_str(), call_id, from);
        self.emit(call_id, CallEventKind::Incoming { from, call_kind });
    }

    pub async fn handle_answer(&self, message: SignalingMessage) {
        if !message.is_addressed_to(&self.inner.self_id) {
            return;
        }
        let SignalingMessage {
            call_id,
            from_user_id: from,
            payload,
            ..
        } = message;
        let SignalingPayload::Answer { answer } = payload else {
            return;
        };

        let mut slot = self.inner.session.lock().await;
        let Some(session) = current(&mut slot, call_id, &from) else {
            debug!("Dropping answer for unknown call {}", call_id);
            return;
        };
        if session.state().on(CallInput::RemoteAnswer) != Transition::Enter(CallState::Connecting)
        {
            debug!("Ignoring answer for call {} while {}", call_id, session.state());
            return;
        }

        let applied = match session.peer_mut() {
            Some(peer) => peer.set_remote_description(answer).await,
            None => Err(PeerError::Closed),
        };
        match applied {
            Ok(()) => {
                session.apply(CallInput::RemoteAnswer);
                session.cancel_ring_timer();
                self.publish(&slot);
                info!("Call {} answered, connecting", call_id);
            }
            Err(e) => {
                warn!("Could not apply answer for call {}: {}", call_id, e);
                self.send(SignalingMessage::end(
                    call_id,
                    self.inner.self_id.clone(),
                    from,
                ));
                self.close_session(&mut slot, EndReason::NegotiationFailed)
                    .await;
            }
        }
    }

    pub async fn handle_ice_candidate(&self, message: SignalingMessage) {
        if !message.is_addressed_to(&self.inner.self_id) {
            return;
        }
        let SignalingMessage {
            call_id,
            from_user_id: from,
            payload,
            ..
        } = message;
        let SignalingPayload::IceCandidate { candidate } = payload else {
            return;
        };

        let mut slot = self.inner.session.lock().await;
        let Some(session) = current(&mut slot, call_id, &from) else {
            debug!("Dropping candidate for unknown call {}", call_id);
            return;
        };

        match session.peer_mut() {
            Some(peer) => {
                if let Err(e) = peer.add_remote_candidate(candidate).await {
                    warn!("Failed to add remote candidate for call {}: {}", call_id, e);
                }
            }
            None => {
                debug!("Buffering candidate for call {} until accepted", call_id);
                session.buffer_candidate(candidate);
            }
        }
    }

    async fn handle_remote_end(&self, message: SignalingMessage) {
        let mut slot = self.inner.session.lock().await;
        let Some(session) = current(&mut slot, message.call_id, &message.from_user_id) else {
            debug!("Dropping end for unknown call {}", message.call_id);
            return;
        };
        if !ends_on(session, CallInput::RemoteEnd) {
            return;
        }

        let reason = if session.state() == CallState::Incoming {
            EndReason::Missed
        } else {
            EndReason::RemoteHangup
        };
        info!("Call {} ended by {}", message.call_id, message.from_user_id);
        self.close_session(&mut slot, reason).await;
    }

    async fn handle_remote_reject(&self, message: SignalingMessage) {
        let mut slot = self.inner.session.lock().await;
        let Some(session) = current(&mut slot, message.call_id, &message.from_user_id) else {
            debug!("Dropping reject for unknown call {}", message.call_id);
            return;
        };
        if !ends_on(session, CallInput::RemoteReject) {
            return;
        }

        info!("Call {} declined by {}", message.call_id, message.from_user_id);
        self.close_session(&mut slot, EndReason::Declined).await;
    }

    // ---------------------------------------------------------------------
    // Peer events and timers
    // ---------------------------------------------------------------------

    async fn handle_peer_event(&self, call_id: CallId, event: PeerEvent) {
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let slot = self.inner.session.lock().await;
                let Some(session) = slot.as_ref().filter(|s| s.call_id() == call_id) else {
                    return;
                };
                self.send(SignalingMessage::ice_candidate(
                    call_id,
                    self.inner.self_id.clone(),
                    session.remote_user().clone(),
                    candidate,
                ));
            }
            PeerEvent::RemoteTrack(track) => self.on_remote_track(call_id, track).await,
            PeerEvent::ConnectionState(state) => {
                debug!("Peer connection for call {} is {:?}", call_id, state);
                if state.is_fatal() {
                    self.on_connection_lost(call_id, state).await;
                } else if state == PeerConnectionState::Connected {
                    let mut slot = self.inner.session.lock().await;
                    self.on_media_connected(&mut slot, call_id);
                }
            }
        }
    }

    async fn on_remote_track(&self, call_id: CallId, track: Arc<dyn MediaTrack>) {
        let mut slot = self.inner.session.lock().await;
        let Some(peer) = slot
            .as_mut()
            .filter(|s| s.call_id() == call_id)
            .and_then(|s| s.peer_mut())
        else {
            track.stop();
            return;
        };
        peer.add_remote_track(track);
        self.on_media_connected(&mut slot, call_id);
    }

    /// First remote media or a connected transport, whichever comes first
    fn on_media_connected(&self, slot: &mut SessionSlot, call_id: CallId) {
        let Some(session) = slot.as_mut().filter(|s| s.call_id() == call_id) else {
            return;
        };

        if session.apply(CallInput::MediaConnected) == Transition::Enter(CallState::Active) {
            session.mark_active(Instant::now());
            self.spawn_duration_ticker(call_id, session.shutdown_signal());
            self.publish(slot);

            info!("Call {} is active", call_id);
            metrics::counter!("peercall_calls_connected_total").increment(1);
            self.emit(call_id, CallEventKind::Connected);
        } else {
            self.publish(slot);
        }
    }

    async fn on_connection_lost(&self, call_id: CallId, state: PeerConnectionState) {
        let mut slot = self.inner.session.lock().await;
        let Some(session) = slot.as_ref().filter(|s| s.call_id() == call_id) else {
            return;
        };
        if !ends_on(session, CallInput::Failure) {
            return;
        }

        let reason = match session.state() {
            CallState::Connecting | CallState::Active => EndReason::ConnectionLost,
            _ => EndReason::NegotiationFailed,
        };
        warn!("Peer connection for call {} is {:?}, ending call", call_id, state);
        self.send(SignalingMessage::end(
            call_id,
            self.inner.self_id.clone(),
            session.remote_user().clone(),
        ));
        self.close_session(&mut slot, reason).await;
    }

    async fn on_ring_timeout(&self, call_id: CallId) {
        let mut slot = self.inner.session.lock().await;
        let Some(session) = slot.as_ref().filter(|s| s.call_id() == call_id) else {
            return;
        };
        if session.is_answering() || !ends_on(session, CallInput::RingTimeout) {
            return;
        }

        let from = self.inner.self_id.clone();
        let to = session.remote_user().clone();
        let (reason, reply) = if session.state() == CallState::Incoming {
            (EndReason::Missed, SignalingMessage::reject(call_id, from, to))
        } else {
            (EndReason::NoAnswer, SignalingMessage::end(call_id, from, to))
        };

        info!("Call {} rang out while {}", call_id, session.state());
        self.send(reply);
        self.close_session(&mut slot, reason).await;
    }

    async fn publish_tick(&self, call_id: CallId) {
        let slot = self.inner.session.lock().await;
        if slot
            .as_ref()
            .is_some_and(|s| s.call_id() == call_id && s.state() == CallState::Active)
        {
            self.publish(&slot);
        }
    }

    fn spawn_peer_pump(
        &self,
        call_id: CallId,
        mut events: PeerEventReceiver,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        let Some(inner) = weak.upgrade() else { break };
                        CallController::from_inner(inner)
                            .handle_peer_event(call_id, event)
                            .await;
                    }
                }
            }
            debug!("Peer event pump for call {} stopped", call_id);
        });
    }

    fn spawn_ring_timer(&self, call_id: CallId, cancel: oneshot::Receiver<()>) {
        let weak = Arc::downgrade(&self.inner);
        let timeout = self.inner.config.ring_timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel => {}
                _ = tokio::time::sleep(timeout) => {
                    if let Some(inner) = weak.upgrade() {
                        CallController::from_inner(inner).on_ring_timeout(call_id).await;
                    }
                }
            }
        });
    }

    fn spawn_duration_ticker(&self, call_id: CallId, mut shutdown: watch::Receiver<bool>) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.duration_tick();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        CallController::from_inner(inner).publish_tick(call_id).await;
                    }
                }
            }
        });
    }

    // ---------------------------------------------------------------------
    // Cleanup and publishing
    // ---------------------------------------------------------------------

    /// Abort a setup step that failed outside the lock
    async fn abort_setup(
        &self,
        call_id: CallId,
        reason: EndReason,
        notify_remote: bool,
        error: CallError,
    ) -> CallError {
        let mut slot = self.inner.session.lock().await;
        let Some(session) = slot.as_ref().filter(|s| s.call_id() == call_id) else {
            return CallError::Cancelled;
        };

        if notify_remote {
            self.send(SignalingMessage::end(
                call_id,
                self.inner.self_id.clone(),
                session.remote_user().clone(),
            ));
        }
        self.close_session(&mut slot, reason).await;
        error
    }

    /// The single exit path: release everything and go back to idle
    async fn close_session(&self, slot: &mut SessionSlot, reason: EndReason) {
        let Some(mut session) = slot.take() else {
            return;
        };

        let call_id = session.call_id();
        let duration = session.elapsed_seconds(Instant::now());
        session.teardown().await;
        drop(session);
        self.publish(slot);

        info!(
            "Call {} ended ({}){}",
            call_id,
            reason.as_str(),
            duration
                .map(|secs| format!(" after {}s", secs))
                .unwrap_or_default()
        );
        metrics::counter!("peercall_calls_ended_total", "reason" => reason.as_str()).increment(1);
        self.emit(
            call_id,
            CallEventKind::Ended {
                reason,
                duration_seconds: duration,
            },
        );
    }

    fn publish(&self, slot: &SessionSlot) {
        let snapshot = slot
            .as_ref()
            .map(|session| session.snapshot(Instant::now()))
            .unwrap_or_default();
        self.inner.snapshot.send_replace(snapshot);
    }

    /// Queue a signaling message behind everything sent before it
    fn send(&self, message: SignalingMessage) {
        if let Err(e) = self.inner.outbox.send(message) {
            warn!("Signaling outbox closed, dropping {}", e.0.type_name());
        }
    }

    fn emit(&self, call_id: CallId, kind: CallEventKind) {
        let event = CallEvent::new(call_id, kind);
        debug!(
            "Emitting {} for call {} at {}",
            event.event_type(),
            call_id,
            event.occurred_at()
        );
        let _ = self.inner.events.send(event);
    }
}
