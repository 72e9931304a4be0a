//! Interface layer - the websocket relay and its HTTP endpoints

pub mod relay;
