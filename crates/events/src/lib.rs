//! Valuo event infrastructure.
//!
//! - [`EventLog`]: the append-only, per-run stage log that live readers
//!   follow without touching the run registry.
//! - [`EventBus`]: in-process publish/subscribe hub for run lifecycle
//!   notices, backed by `tokio::sync::broadcast`.

pub mod bus;
pub mod log;

pub use bus::{EventBus, RunNotice};
pub use log::EventLog;
