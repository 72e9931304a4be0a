//! Peer session manager
//!
//! Wraps one [`PeerConnection`] together with the media it carries. Owns the
//! local media handle once attached, collects remote tracks, and queues
//! remote ICE candidates that arrive before the remote description.

use crate::domain::call::value_object::CallKind;
use crate::domain::media::{LocalMediaHandle, MediaConstraints, MediaDevices, MediaStream, MediaTrack};
use crate::domain::peer::{PeerConnection, PeerConnectionFactory, PeerError, PeerEventSender};
use crate::domain::shared::error::CallError;
use crate::domain::signaling::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Acquire microphone, plus camera for video calls
pub async fn acquire_local_media(
    devices: &dyn MediaDevices,
    kind: CallKind,
) -> Result<LocalMediaHandle, CallError> {
    let constraints = MediaConstraints::for_kind(kind);
    let stream = devices
        .acquire(constraints)
        .await
        .map_err(|e| CallError::MediaDenied(e.to_string()))?;

    // Dropping the handle on the error paths below stops whatever was captured
    let handle = LocalMediaHandle::new(stream, constraints.facing_mode);
    if handle.stream().audio_tracks().next().is_none() {
        return Err(CallError::MediaDenied("no microphone track".to_string()));
    }
    if kind.wants_video() && !handle.stream().has_video() {
        return Err(CallError::MediaDenied("no camera track".to_string()));
    }

    debug!(
        "Acquired local media for {} call: {:?}",
        kind.as_str(),
        handle.stream()
    );
    Ok(handle)
}

/// One negotiated peer-to-peer media session
pub struct PeerSession {
    connection: Arc<dyn PeerConnection>,
    local_media: Option<LocalMediaHandle>,
    remote_stream: MediaStream,
    pending_candidates: Vec<IceCandidate>,
    remote_description_set: bool,
    closed: bool,
}

impl PeerSession {
    /// Create the underlying peer connection
    pub async fn open(
        factory: &dyn PeerConnectionFactory,
        events: PeerEventSender,
    ) -> Result<Self, PeerError> {
        let connection = factory.create(events).await?;
        Ok(Self {
            connection,
            local_media: None,
            remote_stream: MediaStream::default(),
            pending_candidates: Vec::new(),
            remote_description_set: false,
            closed: false,
        })
    }

    /// Take ownership of local media and attach every track to the connection
    ///
    /// The handle is kept even if attaching fails so `close` still releases it.
    pub async fn attach_local_media(&mut self, media: LocalMediaHandle) -> Result<(), PeerError> {
        if self.closed {
            drop(media);
            return Err(PeerError::Closed);
        }

        let tracks: Vec<Arc<dyn MediaTrack>> = media.stream().tracks().to_vec();
        self.local_media = Some(media);

        for track in tracks {
            self.connection.add_track(track).await?;
        }
        Ok(())
    }

    pub async fn create_offer(&mut self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        self.connection.create_offer().await
    }

    /// Apply the remote offer and produce the local answer
    pub async fn create_answer(
        &mut self,
        remote: SessionDescription,
    ) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        if self.local_media.is_none() {
            return Err(PeerError::Negotiation(
                "local media must be attached before answering".to_string(),
            ));
        }

        self.set_remote_description(remote).await?;
        self.connection.create_answer().await
    }

    /// Apply the remote description and flush queued candidates
    pub async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.ensure_open()?;
        self.connection.set_remote_description(description).await?;
        self.remote_description_set = true;
        self.flush_candidates().await;
        Ok(())
    }

    /// Add a remote candidate, queueing it until the remote description is set
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.ensure_open()?;
        if !self.remote_description_set {
            debug!("Queueing remote candidate until remote description is set");
            self.pending_candidates.push(candidate);
            return Ok(());
        }
        self.connection.add_ice_candidate(candidate).await
    }

    async fn flush_candidates(&mut self) {
        let pending = std::mem::take(&mut self.pending_candidates);
        if pending.is_empty() {
            return;
        }

        debug!("Flushing {} queued remote candidate(s)", pending.len());
        for candidate in pending {
            // One unusable path is not fatal; the others may still connect
            if let Err(e) = self.connection.add_ice_candidate(candidate).await {
                warn!("Failed to apply queued candidate: {}", e);
            }
        }
    }

    /// Record a remote track; returns the updated remote stream
    pub fn add_remote_track(&mut self, track: Arc<dyn MediaTrack>) -> MediaStream {
        if self.closed {
            track.stop();
        } else {
            self.remote_stream.add_track(track);
        }
        self.remote_stream.clone()
    }

    pub fn local_media(&self) -> Option<&LocalMediaHandle> {
        self.local_media.as_ref()
    }

    pub fn local_media_mut(&mut self) -> Option<&mut LocalMediaHandle> {
        self.local_media.as_mut()
    }

    pub fn remote_stream(&self) -> &MediaStream {
        &self.remote_stream
    }

    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop local and remote tracks and close the connection. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending_candidates.clear();

        if let Some(media) = self.local_media.as_mut() {
            media.release();
        }
        self.remote_stream.stop_all();

        if let Err(e) = self.connection.close().await {
            warn!("Error while closing peer connection: {}", e);
        }
        info!("Peer session closed");
    }

    fn ensure_open(&self) -> Result<(), PeerError> {
        if self.closed {
            Err(PeerError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Local media is released by its own Drop; the connection needs an
        // async close, so hand it to the runtime if there is one.
        self.remote_stream.stop_all();
        let connection = self.connection.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = connection.close().await {
                    warn!("Error while closing dropped peer connection: {}", e);
                }
            });
        }
    }
}
