//! Scheduler seam between the engine and placement strategies

use serde::{Deserialize, Serialize};

use cosched_core::{Result, SimError};

use crate::cluster::ClusterState;
use crate::schedulers::{EasyScheduler, FifoScheduler, Matching, RanksCoscheduler};

/// Outcome of one submission pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmissionResult {
    /// True when at least one job was placed
    pub submitted: bool,
    /// Number of jobs placed during the pass
    pub placed: usize,
}

impl SubmissionResult {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_placed(placed: usize) -> Self {
        Self {
            submitted: placed > 0,
            placed,
        }
    }
}

/// Placement strategy driven by the engine
///
/// Implementations read the cluster through its borrowed views and place
/// jobs only through `ClusterState::deploy_unit` / `place_in_unit`.
pub trait Scheduler {
    /// Get scheduler name
    fn name(&self) -> &str;

    /// Whether a successful submission should be followed by another pass
    /// before time advances
    fn backfill_enabled(&self) -> bool {
        false
    }

    /// Prepare internal state before a run
    fn setup(&mut self, _cluster: &ClusterState) {}

    /// Place waiting jobs
    fn submit(&mut self, cluster: &mut ClusterState) -> Result<SubmissionResult>;
}

fn default_threshold() -> f64 {
    1.0
}

/// Scheduler selection as written in configuration files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerSpec {
    Fifo,
    Easy,
    Ranks {
        #[serde(default = "default_threshold")]
        threshold: f64,
        #[serde(default = "default_threshold")]
        ranks_threshold: f64,
        #[serde(default)]
        matching: Matching,
    },
}

impl SchedulerSpec {
    pub fn build(&self) -> Result<Box<dyn Scheduler>> {
        Ok(match self {
            SchedulerSpec::Fifo => Box::new(FifoScheduler::new()),
            SchedulerSpec::Easy => Box::new(EasyScheduler::new()),
            SchedulerSpec::Ranks {
                threshold,
                ranks_threshold,
                matching,
            } => Box::new(RanksCoscheduler::new(*threshold, *ranks_threshold, *matching)?),
        })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SchedulerSpec::Fifo => "FIFO",
            SchedulerSpec::Easy => "EASY",
            SchedulerSpec::Ranks { .. } => "Ranks",
        }
    }
}

impl std::str::FromStr for SchedulerSpec {
    type Err = SimError;

    /// Parse a CLI name; co-schedulers get default thresholds
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(SchedulerSpec::Fifo),
            "easy" => Ok(SchedulerSpec::Easy),
            "ranks" => Ok(SchedulerSpec::Ranks {
                threshold: default_threshold(),
                ranks_threshold: default_threshold(),
                matching: Matching::default(),
            }),
            other => Err(SimError::config(format!("unknown scheduler '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_result() {
        assert!(!SubmissionResult::none().submitted);
        assert_eq!(
            SubmissionResult::from_placed(3),
            SubmissionResult {
                submitted: true,
                placed: 3
            }
        );
    }

    #[test]
    fn test_spec_from_json() {
        let spec: SchedulerSpec = serde_json::from_str(
            r#"{"kind": "ranks", "threshold": 1.1, "matching": "first_fit"}"#,
        )
        .unwrap();
        assert_eq!(
            spec,
            SchedulerSpec::Ranks {
                threshold: 1.1,
                ranks_threshold: 1.0,
                matching: Matching::FirstFit
            }
        );
        // ranks_threshold below threshold is rejected at build time
        assert!(matches!(spec.build(), Err(SimError::Config(_))));
    }

    #[test]
    fn test_spec_from_str() {
        assert_eq!("FIFO".parse::<SchedulerSpec>().unwrap(), SchedulerSpec::Fifo);
        assert_eq!("ranks".parse::<SchedulerSpec>().unwrap().label(), "Ranks");
        assert!("sjf".parse::<SchedulerSpec>().is_err());
        assert_eq!("easy".parse::<SchedulerSpec>().unwrap().build().unwrap().name(), "EASY");
    }
}
