//! Valuo domain core.
//!
//! Pure types and calculations shared by every other crate: run identity and
//! status, stage events, entity resolution, fact mapping, the historical
//! series, scenario guardrails, forecasting, DCF math, and artifact writers.
//! Nothing in here performs I/O.

pub mod error;
pub mod export;
pub mod forecast;
pub mod hashing;
pub mod historical;
pub mod mapper;
pub mod resolver;
pub mod run;
pub mod scenario;
pub mod types;
pub mod valuation;
