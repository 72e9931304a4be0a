//! peercall - one-to-one voice/video call signaling
//!
//! A call controller that proposes, accepts, negotiates and tears down direct
//! peer-to-peer calls over a per-conversation signaling relay, together with
//! the relay itself.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use application::{CallController, CallSnapshot};
pub use domain::shared::error::CallError;
pub use domain::shared::result::Result;
