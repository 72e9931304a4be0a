//! Call use cases - controller plus the session aggregate it owns

pub mod controller;
pub mod session;

pub use controller::CallController;
pub use session::{CallSession, CallSnapshot};
