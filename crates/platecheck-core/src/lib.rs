//! platecheck core library: verifies production plates on disk against the
//! asset database and writes the reconciled state back.
//!
//! A run walks each shot's plates directory, groups image sequences, reads
//! boundary-frame headers for metadata, checks frame integrity, and then
//! creates or updates plate versions, registers published files and uploads
//! a review movie. Problems are collected as faults rather than raised.

pub mod config;
pub mod errors;
pub mod models;
pub mod reconcile;
pub mod scanner;
pub mod store;
pub mod timecode;

#[cfg(test)]
pub(crate) mod testing;

pub use config::PlatecheckConfig;
pub use errors::{PlatecheckError, PlatecheckResult, PublishError};
pub use reconcile::{FaultReport, PlateVerifier, RunStats, VerifierSettings};
pub use scanner::exr::ExrHeaderReader;
pub use store::{AssetDatabase, SqliteAssetDatabase};
