//! Cosched Core - Shared model for co-scheduling simulation
//!
//! This crate defines the data model used by the simulation engine:
//! - Job records with their per-co-job speedup tables
//! - Execution units built from explicit `Slot`s (empty or occupied)
//! - Interference resolution inside a unit
//! - Identifiers and the error taxonomy

pub mod types;
pub mod job;
pub mod unit;
pub mod error;

pub use types::*;
pub use job::*;
pub use unit::*;
pub use error::*;
