//! webrtc-rs binding for the peer and media ports

pub mod media;
pub mod peer_connection;

pub use media::{SampleMediaDevices, SampleTrack};
pub use peer_connection::{RemoteTrack, WebRtcPeerConnection, WebRtcPeerFactory};
