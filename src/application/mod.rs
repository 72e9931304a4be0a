//! Application layer
//!
//! Orchestrates the domain ports into the call use cases: the call controller
//! and the peer session manager it drives.

pub mod call;
pub mod peer_session;

pub use call::{CallController, CallSnapshot};
pub use peer_session::PeerSession;
