//! Signaling relay server

pub mod metrics;
pub mod server;

pub use metrics::{init_metrics, metrics_handler};
pub use server::{RelayServer, RelayState};
