//! Live run event streaming over WebSocket.

mod handler;

pub use handler::run_events_ws;
