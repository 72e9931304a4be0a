//! Domain layer - Call rules and the ports the call subsystem depends on
//!
//! This layer contains:
//! - The call state machine, value objects and events
//! - The signaling message envelope and relay transport port
//! - Media and peer connection ports

pub mod call;
pub mod media;
pub mod peer;
pub mod shared;
pub mod signaling;

// Re-export commonly used types
pub use shared::{CallError, Result};
