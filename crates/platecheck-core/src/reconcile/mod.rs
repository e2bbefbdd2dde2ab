//! Per-shot aggregation, write-back and reporting.

pub mod aggregator;
pub mod engine;
pub mod reconciler;
pub mod report;
pub mod retry;

pub use engine::{PlateVerifier, RunStats, VerifierSettings};
pub use report::FaultReport;
