//! Valuation pipeline runner.
//!
//! [`PipelineRunner`] drives one attempt of a run through the ordered
//! stages (Resolve, Ingest, Map, Forecast, DCF, Export), appending a stage
//! event to the run's [`EventLog`](valuo_events::EventLog) as it goes and
//! returning the attempt's private [`AttemptOutput`]. External data comes
//! from the [`EntityResolver`] and [`FactSource`] collaborators.

pub mod error;
pub mod runner;
pub mod sources;

pub use error::StageError;
pub use runner::{AttemptOutput, PipelineRunner};
pub use sources::{EntityResolver, FactSet, FactSource, SeedResolver, StubFactSource};
