//! Error handling for the simulation engine

use thiserror::Error;

use cosched_core::SimError;

use crate::cluster::SimulationFailure;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced to callers of the engine: I/O around workloads and
/// configuration, plus everything the model raises
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Simulation(#[from] SimulationFailure),

    #[error(transparent)]
    Core(#[from] SimError),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Core(SimError::config(msg))
    }
}
