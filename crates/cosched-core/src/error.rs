//! Error types for the co-scheduling model

use thiserror::Error;

use crate::types::{JobId, UnitId};

/// Result type for model and engine operations
pub type Result<T> = std::result::Result<T, SimError>;

/// Core error type for simulation operations
///
/// Every variant except `Config` is fatal for the run that raised it: the
/// engine aborts instead of retrying.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("Job {job} has no speedup entry for co-job '{co_job}'")]
    UnknownCoJob { job: String, co_job: String },

    #[error("Invalid speedup factor {factor} for job {job}")]
    InvalidSpeedup { job: String, factor: f64 },

    #[error("No next event: nothing is running and nothing is pending")]
    NoNextEvent,

    #[error("Job {job} reached negative remaining time {remaining}")]
    NegativeRemainingTime { job: JobId, remaining: f64 },

    #[error("Core accounting violated: {0}")]
    AccountingViolation(String),

    #[error("Job {0} is held in more than one queue")]
    DuplicateJob(JobId),

    #[error("Job {0} is not in the waiting queue")]
    JobNotWaiting(JobId),

    #[error("Execution unit {0} not found")]
    UnitNotFound(UnitId),

    #[error("Insufficient capacity: need {need} cores, have {have}")]
    CapacityExceeded { need: u32, have: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Step limit of {0} iterations exceeded")]
    StepLimitExceeded(u64),

    #[error("Makespan limit of {0}s exceeded")]
    MakespanLimitExceeded(f64),
}

impl SimError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an accounting violation
    pub fn accounting(msg: impl Into<String>) -> Self {
        Self::AccountingViolation(msg.into())
    }
}
