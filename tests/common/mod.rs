//! Shared fakes and harness for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use peercall::application::CallController;
use peercall::config::CallConfig;
use peercall::domain::call::{CallKind, CallState};
use peercall::domain::media::{
    FacingMode, MediaConstraints, MediaDevices, MediaError, MediaStream, MediaTrack, TrackKind,
};
use peercall::domain::peer::{
    PeerConnection, PeerConnectionFactory, PeerConnectionState, PeerError, PeerEvent,
    PeerEventSender,
};
use peercall::domain::shared::value_objects::{CallId, ConversationId, ParticipantId};
use peercall::domain::signaling::{
    IceCandidate, SessionDescription, SignalingMessage, SignalingStream, SignalingTransport,
};
use peercall::infrastructure::signaling::{InMemoryRelay, SignalingChannel};
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub const CONVERSATION: &str = "conv-alice-bob";

pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stops: AtomicUsize,
    facing: Mutex<FacingMode>,
}

impl FakeTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            stops: AtomicUsize::new(0),
            facing: Mutex::new(FacingMode::User),
        })
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn facing(&self) -> FacingMode {
        *self.facing.lock().unwrap()
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn set_facing_mode(&self, mode: FacingMode) -> Result<(), MediaError> {
        *self.facing.lock().unwrap() = mode;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Devices that hand out counting tracks
#[derive(Default)]
pub struct FakeDevices {
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
    acquisitions: AtomicUsize,
    deny: AtomicBool,
    gated: AtomicBool,
    gate: Notify,
}

impl FakeDevices {
    pub fn deny(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    /// Hold every acquisition until [`FakeDevices::open_gate`]
    pub fn close_gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn open_gate(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.notify_one();
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().unwrap().clone()
    }

    /// Every acquired track was stopped exactly once
    pub fn all_stopped_once(&self) -> bool {
        self.tracks().iter().all(|t| t.stops() == 1)
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }

        let n = self.acquisitions();
        let mut acquired: Vec<Arc<FakeTrack>> = vec![FakeTrack::new(format!("mic-{}", n), TrackKind::Audio)];
        if constraints.video {
            acquired.push(FakeTrack::new(format!("cam-{}", n), TrackKind::Video));
        }
        self.tracks.lock().unwrap().extend(acquired.iter().cloned());

        Ok(MediaStream::new(
            acquired
                .into_iter()
                .map(|t| t as Arc<dyn MediaTrack>)
                .collect(),
        ))
    }
}

/// Peer connection that records calls and lets the test raise events
pub struct FakeConnection {
    events: PeerEventSender,
    calls: Mutex<Vec<String>>,
    closes: AtomicUsize,
    fail_remote: bool,
    remote_tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeConnection {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    /// Simulate the first remote media arriving
    pub fn emit_remote_track(&self, kind: TrackKind) -> Arc<FakeTrack> {
        let track = FakeTrack::new(format!("remote-{:?}", kind), kind);
        self.remote_tracks.lock().unwrap().push(track.clone());
        let _ = self.events.send(PeerEvent::RemoteTrack(track.clone()));
        track
    }

    pub fn emit_state(&self, state: PeerConnectionState) {
        let _ = self.events.send(PeerEvent::ConnectionState(state));
    }

    pub fn emit_candidate(&self, candidate: &str) {
        let _ = self
            .events
            .send(PeerEvent::LocalCandidate(IceCandidate::new(candidate)));
    }

    pub fn remote_tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.remote_tracks.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), PeerError> {
        self.record(format!("add_track:{}", track.id()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.record("create_offer");
        Ok(SessionDescription::offer("v=0 fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.record("create_answer");
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn set_remote_description(
        &self,
        _description: SessionDescription,
    ) -> Result<(), PeerError> {
        if self.fail_remote {
            return Err(PeerError::Negotiation("unparseable sdp".to_string()));
        }
        self.record("set_remote");
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.record(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePeerFactory {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    fail_remote: AtomicBool,
}

impl FakePeerFactory {
    pub fn fail_remote_description(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.connections.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<FakeConnection> {
        self.connections()
            .last()
            .cloned()
            .expect("no peer connection was created")
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn create(&self, events: PeerEventSender) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let connection = Arc::new(FakeConnection {
            events,
            calls: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            fail_remote: self.fail_remote.load(Ordering::SeqCst),
            remote_tracks: Mutex::new(Vec::new()),
        });
        self.connections.lock().unwrap().push(connection.clone());
        Ok(connection)
    }
}

/// One endpoint wired to a transport
pub struct Endpoint {
    pub id: ParticipantId,
    pub controller: CallController,
    pub devices: Arc<FakeDevices>,
    pub peers: Arc<FakePeerFactory>,
    pub listener: JoinHandle<()>,
}

impl Endpoint {
    pub async fn connect(
        id: &str,
        transport: Arc<dyn SignalingTransport>,
        config: CallConfig,
    ) -> Self {
        let devices = Arc::new(FakeDevices::default());
        let peers = Arc::new(FakePeerFactory::default());
        let channel = SignalingChannel::new(ConversationId::from(CONVERSATION), transport);
        let controller = CallController::new(
            ParticipantId::from(id),
            channel,
            devices.clone(),
            peers.clone(),
            config,
        );
        let listener = controller.listen().await.expect("subscribe failed");

        Self {
            id: ParticipantId::from(id),
            controller,
            devices,
            peers,
            listener,
        }
    }

    pub async fn wait_for_state(&self, state: CallState) {
        let mut rx = self.controller.watch();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.state == state))
            .await
            .unwrap_or_else(|_| panic!("{} never reached {}", self.id, state))
            .expect("controller dropped");
    }

    pub async fn wait_for_elapsed(&self, seconds: u64) {
        let mut rx = self.controller.watch();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.elapsed_seconds == seconds),
        )
        .await
        .unwrap_or_else(|_| panic!("{} never showed {}s", self.id, seconds))
        .expect("controller dropped");
    }
}

/// Relay plus a tap that sees every message on the conversation
pub struct Harness {
    pub relay: Arc<InMemoryRelay>,
    pub tap: SignalingStream,
    pub alice: Endpoint,
    pub bob: Endpoint,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_configs(CallConfig::default(), CallConfig::default()).await
    }

    pub async fn with_configs(alice: CallConfig, bob: CallConfig) -> Self {
        let relay = Arc::new(InMemoryRelay::default());
        let tap = relay
            .subscribe(&ConversationId::from(CONVERSATION))
            .await
            .expect("tap subscribe failed");
        let alice = Endpoint::connect("alice", relay.clone(), alice).await;
        let bob = Endpoint::connect("bob", relay.clone(), bob).await;

        Self {
            relay,
            tap,
            alice,
            bob,
        }
    }

    pub async fn publish(&self, message: SignalingMessage) {
        self.relay
            .publish(&ConversationId::from(CONVERSATION), &message)
            .await
            .expect("publish failed");
    }

    /// Next message on the wire of the given type
    pub async fn next_of_type(&mut self, type_name: &str) -> SignalingMessage {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let message = self.tap.next().await.expect("relay closed");
                if message.type_name() == type_name {
                    return message;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {} message on the wire", type_name))
    }

    /// Everything already on the wire, without waiting
    pub fn drain(&mut self) -> Vec<SignalingMessage> {
        let mut seen = Vec::new();
        while let Some(Some(message)) = self.tap.next().now_or_never() {
            seen.push(message);
        }
        seen
    }

    /// alice calls bob, bob accepts, both sides see remote media
    pub async fn establish(&mut self, kind: CallKind) -> CallId {
        let call_id = self
            .alice
            .controller
            .start_call(self.bob.id.clone(), kind)
            .await
            .expect("start_call failed");
        self.bob.wait_for_state(CallState::Incoming).await;
        self.bob
            .controller
            .accept_incoming_call()
            .await
            .expect("accept failed");
        self.alice.wait_for_state(CallState::Connecting).await;

        self.alice.peers.last().emit_remote_track(TrackKind::Audio);
        self.bob.peers.last().emit_remote_track(TrackKind::Audio);
        self.alice.wait_for_state(CallState::Active).await;
        self.bob.wait_for_state(CallState::Active).await;
        call_id
    }
}

