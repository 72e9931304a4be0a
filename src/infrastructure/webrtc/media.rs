//! Sample-fed local tracks
//!
//! webrtc-rs does not capture devices itself. A [`SampleTrack`] wraps a
//! `TrackLocalStaticSample`; the platform capture pipeline encodes frames and
//! pushes them through [`SampleTrack::write_sample`].

use crate::domain::media::{
    FacingMode, MediaConstraints, MediaDevices, MediaError, MediaStream, MediaTrack, TrackKind,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Opus frame carrying 20ms of silence
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Local track whose frames come from an external encoder
pub struct SampleTrack {
    id: String,
    kind: TrackKind,
    rtc: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
    facing_mode: Mutex<FacingMode>,
}

impl SampleTrack {
    /// Opus microphone track
    pub fn audio(stream_id: &str) -> Arc<Self> {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        };
        Arc::new(Self::new(TrackKind::Audio, capability, stream_id, FacingMode::User))
    }

    /// VP8 camera track
    pub fn video(stream_id: &str, facing_mode: FacingMode) -> Arc<Self> {
        let capability = RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        };
        Arc::new(Self::new(TrackKind::Video, capability, stream_id, facing_mode))
    }

    fn new(
        kind: TrackKind,
        capability: RTCRtpCodecCapability,
        stream_id: &str,
        facing_mode: FacingMode,
    ) -> Self {
        let id = format!(
            "{}-{}",
            match kind {
                TrackKind::Audio => "audio",
                TrackKind::Video => "video",
            },
            Uuid::new_v4()
        );
        let rtc = Arc::new(TrackLocalStaticSample::new(
            capability,
            id.clone(),
            stream_id.to_owned(),
        ));

        Self {
            id,
            kind,
            rtc,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            facing_mode: Mutex::new(facing_mode),
        }
    }

    pub fn rtc_track(&self) -> Arc<TrackLocalStaticSample> {
        self.rtc.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Camera the capture pipeline should read from
    pub fn facing_mode(&self) -> FacingMode {
        self.facing_mode
            .lock()
            .map(|mode| *mode)
            .unwrap_or_default()
    }

    /// Push one encoded frame; returns `false` when the frame was not sent as is
    ///
    /// A muted microphone keeps the RTP flow alive with Opus silence so the
    /// remote side still sees media arrive. A disabled camera sends nothing.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<bool, MediaError> {
        let Some((payload, as_is)) = self.outgoing_payload(data) else {
            return Ok(false);
        };

        let sample = Sample {
            data: payload,
            duration,
            ..Default::default()
        };
        self.rtc
            .write_sample(&sample)
            .await
            .map_err(|e| MediaError::Device(e.to_string()))?;
        Ok(as_is)
    }

    /// What goes on the wire for `data`, and whether it is `data` itself
    fn outgoing_payload(&self, data: Bytes) -> Option<(Bytes, bool)> {
        if self.is_stopped() {
            return None;
        }
        if self.is_enabled() {
            return Some((data, true));
        }
        match self.kind {
            TrackKind::Audio => Some((Bytes::from_static(&OPUS_SILENCE), false)),
            TrackKind::Video => None,
        }
    }
}

impl MediaTrack for SampleTrack {
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
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Stopped local track {}", self.id);
        }
    }

    fn set_facing_mode(&self, mode: FacingMode) -> Result<(), MediaError> {
        if self.kind != TrackKind::Video {
            return Err(MediaError::Unsupported(format!(
                "{} is not a camera track",
                self.id
            )));
        }
        let mut facing = self
            .facing_mode
            .lock()
            .map_err(|_| MediaError::Device("facing mode lock poisoned".to_string()))?;
        *facing = mode;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Hands out fresh sample tracks for each acquisition
///
/// Every new track is announced on [`SampleMediaDevices::captures`] so the
/// capture pipeline can start feeding it.
pub struct SampleMediaDevices {
    camera_available: bool,
    captures: broadcast::Sender<Arc<SampleTrack>>,
}

impl SampleMediaDevices {
    pub fn new() -> Self {
        let (captures, _) = broadcast::channel(16);
        Self {
            camera_available: true,
            captures,
        }
    }

    /// Devices on a host without a camera
    pub fn without_camera() -> Self {
        Self {
            camera_available: false,
            ..Self::new()
        }
    }

    pub fn captures(&self) -> broadcast::Receiver<Arc<SampleTrack>> {
        self.captures.subscribe()
    }
}

impl Default for SampleMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SampleMediaDevices {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError> {
        if constraints.video && !self.camera_available {
            return Err(MediaError::DeviceNotFound("camera".to_string()));
        }

        let stream_id = format!("local-{}", Uuid::new_v4());
        let mut tracks: Vec<Arc<SampleTrack>> = Vec::new();
        if constraints.audio {
            tracks.push(SampleTrack::audio(&stream_id));
        }
        if constraints.video {
            tracks.push(SampleTrack::video(&stream_id, constraints.facing_mode));
        }

        for track in &tracks {
            let _ = self.captures.send(track.clone());
        }

        Ok(MediaStream::new(
            tracks
                .into_iter()
                .map(|t| t as Arc<dyn MediaTrack>)
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::value_object::CallKind;

    #[tokio::test]
    async fn test_acquire_video_gives_audio_and_video() {
        let devices = SampleMediaDevices::new();
        let mut captures = devices.captures();

        let stream = devices
            .acquire(MediaConstraints::for_kind(CallKind::Video))
            .await
            .unwrap();

        assert_eq!(stream.audio_tracks().count(), 1);
        assert_eq!(stream.video_tracks().count(), 1);
        assert!(captures.recv().await.is_ok());
        assert!(captures.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_camera_is_reported() {
        let devices = SampleMediaDevices::without_camera();
        let result = devices
            .acquire(MediaConstraints::for_kind(CallKind::Video))
            .await;
        assert!(matches!(result, Err(MediaError::DeviceNotFound(_))));

        let voice = devices
            .acquire(MediaConstraints::for_kind(CallKind::Voice))
            .await
            .unwrap();
        assert_eq!(voice.tracks().len(), 1);
    }

    #[tokio::test]
    async fn test_stopped_track_drops_samples() {
        let track = SampleTrack::audio("s");
        track.stop();
        let written = track
            .write_sample(Bytes::from_static(b"frame"), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(!written);
        assert_eq!(track.outgoing_payload(Bytes::from_static(b"frame")), None);
    }

    #[test]
    fn test_muted_microphone_sends_silence() {
        let track = SampleTrack::audio("s");
        let frame = Bytes::from_static(b"frame");
        assert_eq!(track.outgoing_payload(frame.clone()), Some((frame.clone(), true)));

        track.set_enabled(false);
        assert_eq!(
            track.outgoing_payload(frame),
            Some((Bytes::from_static(&OPUS_SILENCE), false))
        );
    }

    #[tokio::test]
    async fn test_muted_microphone_still_writes() {
        let track = SampleTrack::audio("s");
        track.set_enabled(false);
        // Substituted, so not reported as the caller's frame
        let written = track
            .write_sample(Bytes::from_static(b"frame"), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(!written);
    }

    #[test]
    fn test_disabled_camera_sends_nothing() {
        let track = SampleTrack::video("s", FacingMode::User);
        track.set_enabled(false);
        assert_eq!(track.outgoing_payload(Bytes::from_static(b"frame")), None);
    }

    #[test]
    fn test_facing_mode_only_on_video() {
        let audio = SampleTrack::audio("s");
        assert!(audio.set_facing_mode(FacingMode::Environment).is_err());

        let video = SampleTrack::video("s", FacingMode::User);
        video.set_facing_mode(FacingMode::Environment).unwrap();
        assert_eq!(video.facing_mode(), FacingMode::Environment);
    }
}
