//! Local and remote media
//!
//! Ports for device capture plus [`LocalMediaHandle`], the owned bundle of
//! captured tracks that must be released before a call session goes away.

use crate::domain::call::value_object::CallKind;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Camera facing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FacingMode {
    /// Front camera
    #[default]
    User,
    /// Rear camera
    Environment,
}

impl FacingMode {
    pub fn flipped(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }
}

/// Media acquisition errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Permission denied")]
    PermissionDenied,

    #[error("No device: {0}")]
    DeviceNotFound(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Device error: {0}")]
    Device(String),
}

/// A single audio or video track
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    fn is_enabled(&self) -> bool;

    /// Mute/unmute without releasing the device
    fn set_enabled(&self, enabled: bool);

    /// Stop the track and release the underlying device
    fn stop(&self);

    fn set_facing_mode(&self, _mode: FacingMode) -> Result<(), MediaError> {
        Err(MediaError::Unsupported(format!(
            "track {} cannot switch camera",
            self.id()
        )))
    }

    /// Lets a peer backend recover its concrete track type
    fn as_any(&self) -> &dyn Any;
}

/// Requested capture devices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    pub facing_mode: FacingMode,
}

impl MediaConstraints {
    /// Microphone always, camera for video calls
    pub fn for_kind(kind: CallKind) -> Self {
        Self {
            audio: true,
            video: kind.wants_video(),
            facing_mode: FacingMode::User,
        }
    }
}

/// Group of tracks rendered together
#[derive(Clone, Default)]
pub struct MediaStream {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }

    pub fn add_track(&mut self, track: Arc<dyn MediaTrack>) {
        if !self.tracks.iter().any(|t| t.id() == track.id()) {
            self.tracks.push(track);
        }
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(|t| t.kind() == TrackKind::Video)
    }

    pub fn has_video(&self) -> bool {
        self.video_tracks().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tracks.iter().map(|t| (t.id().to_string(), t.kind())))
            .finish()
    }
}

/// Device capture port
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Request capture; may wait on a permission prompt
    async fn acquire(&self, constraints: MediaConstraints) -> Result<MediaStream, MediaError>;
}

/// Exclusive ownership of captured microphone/camera tracks
///
/// Tracks are stopped exactly once, either by [`LocalMediaHandle::release`] or
/// when the handle is dropped.
pub struct LocalMediaHandle {
    stream: MediaStream,
    facing_mode: FacingMode,
    released: bool,
}

impl LocalMediaHandle {
    pub fn new(stream: MediaStream, facing_mode: FacingMode) -> Self {
        Self {
            stream,
            facing_mode,
            released: false,
        }
    }

    pub fn stream(&self) -> &MediaStream {
        &self.stream
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn is_muted(&self) -> bool {
        self.stream.audio_tracks().all(|t| !t.is_enabled())
    }

    pub fn set_muted(&self, muted: bool) {
        for track in self.stream.audio_tracks() {
            track.set_enabled(!muted);
        }
    }

    pub fn is_video_enabled(&self) -> bool {
        self.stream.video_tracks().any(|t| t.is_enabled())
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        for track in self.stream.video_tracks() {
            track.set_enabled(enabled);
        }
    }

    pub fn facing_mode(&self) -> FacingMode {
        self.facing_mode
    }

    /// Flip between front and rear camera on the live video track
    pub fn switch_camera(&mut self) -> Result<FacingMode, MediaError> {
        if !self.stream.has_video() {
            return Err(MediaError::DeviceNotFound("no camera track".to_string()));
        }

        let next = self.facing_mode.flipped();
        for track in self.stream.video_tracks() {
            track.set_facing_mode(next)?;
        }
        self.facing_mode = next;
        Ok(next)
    }

    /// Stop every captured track. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.stream.stop_all();
        debug!("Released {} local track(s)", self.stream.tracks().len());
    }
}

impl Drop for LocalMediaHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for LocalMediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMediaHandle")
            .field("stream", &self.stream)
            .field("facing_mode", &self.facing_mode)
            .field("released", &self.released)
            .finish()
    }
}
