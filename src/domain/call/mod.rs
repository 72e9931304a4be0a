//! Call bounded context - states, transitions and events of one call

pub mod event;
pub mod state_machine;
pub mod value_object;

pub use event::{CallEvent, CallEventKind};
pub use state_machine::{CallInput, Transition};
pub use value_object::{CallKind, CallRole, CallState, EndReason};
