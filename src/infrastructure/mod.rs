//! Infrastructure layer
//!
//! Adapters behind the domain ports: relay transports plus the signaling
//! channel built on them, and the webrtc-rs peer connection and media binding.

pub mod signaling;
pub mod webrtc;
