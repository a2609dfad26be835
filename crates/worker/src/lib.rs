//! Run orchestration engine.
//!
//! The [`Orchestrator`] owns the [`RunRegistry`], the bounded [`JobQueue`],
//! the [`RetryController`] and a [`WorkerPool`] draining the queue through
//! the pipeline runner. It is constructed explicitly with
//! [`Orchestrator::start`] and stopped with [`Orchestrator::shutdown`].

pub mod orchestrator;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod retry;

pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use pool::WorkerPool;
pub use queue::{JobQueue, QueueError, QueueSlot};
pub use registry::{Run, RunRegistry, RunUpdate};
pub use retry::{backoff_delay, RetryController, RetryDecision, RetryPolicy};
