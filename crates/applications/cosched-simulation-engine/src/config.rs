//! Simulation configuration
//!
//! A single JSON document describes the cluster, the time-advance policy,
//! the schedulers to compare, run limits and the workload source. Every
//! section has defaults, so `{}` is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use cosched_core::{Job, SimError};

use crate::cluster::RunLimits;
use crate::error::Result;
use crate::policies::PolicyKind;
use crate::scheduler::SchedulerSpec;
use crate::schedulers::Matching;
use crate::workload::{JobDescriptor, KeyedArrival, LoadCatalog, Workload, WorkloadGenerator};

fn default_nodes() -> u32 {
    16
}

fn default_cores_per_node() -> u32 {
    20
}

fn default_schedulers() -> Vec<SchedulerSpec> {
    vec![
        SchedulerSpec::Fifo,
        SchedulerSpec::Easy,
        SchedulerSpec::Ranks {
            threshold: 1.0,
            ranks_threshold: 1.0,
            matching: Matching::Optimal,
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_nodes")]
    pub nodes: u32,
    #[serde(default = "default_cores_per_node")]
    pub cores_per_node: u32,
    /// Upper bound on the waiting queue, unbounded when absent
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            cores_per_node: default_cores_per_node(),
            queue_capacity: None,
        }
    }
}

fn default_job_count() -> usize {
    100
}

fn default_mean_inter_arrival() -> f64 {
    30.0
}

/// Where the jobs of a run come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkloadSource {
    /// A JSON trace file
    Trace { path: PathBuf },
    /// Random draws from a load catalog (built-in when `catalog` is absent)
    Generate {
        #[serde(default)]
        catalog: Option<PathBuf>,
        #[serde(default = "default_job_count")]
        jobs: usize,
        #[serde(default = "default_mean_inter_arrival")]
        mean_inter_arrival: f64,
        #[serde(default)]
        seed: u64,
    },
    /// Named catalog loads at fixed arrival times (built-in catalog when absent)
    Keys {
        #[serde(default)]
        catalog: Option<PathBuf>,
        keys: Vec<KeyedArrival>,
    },
}

fn load_catalog(path: Option<&Path>) -> Result<LoadCatalog> {
    match path {
        Some(path) => LoadCatalog::from_file(path),
        None => Ok(LoadCatalog::builtin()),
    }
}

impl Default for WorkloadSource {
    fn default() -> Self {
        WorkloadSource::Generate {
            catalog: None,
            jobs: default_job_count(),
            mean_inter_arrival: default_mean_inter_arrival(),
            seed: 0,
        }
    }
}

impl WorkloadSource {
    /// The workload as trace entries
    pub fn descriptors(&self) -> Result<Vec<JobDescriptor>> {
        match self {
            WorkloadSource::Trace { path } => Ok(Workload::from_file(path)?.jobs),
            WorkloadSource::Generate {
                catalog,
                jobs,
                mean_inter_arrival,
                seed,
            } => {
                let catalog = load_catalog(catalog.as_deref())?;
                let mut generator = WorkloadGenerator::new(catalog, *seed, *mean_inter_arrival)?;
                Ok(generator.generate(*jobs))
            }
            WorkloadSource::Keys { catalog, keys } => load_catalog(catalog.as_deref())?.from_keys(keys),
        }
    }

    /// Materialize the job list
    pub fn load(&self) -> Result<Vec<Job>> {
        let jobs = self.descriptors()?;
        Ok(Workload { jobs }.into_jobs())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub policy: PolicyKind,
    #[serde(default = "default_schedulers")]
    pub schedulers: Vec<SchedulerSpec>,
    #[serde(default)]
    pub limits: RunLimits,
    #[serde(default)]
    pub workload: WorkloadSource,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            policy: PolicyKind::default(),
            schedulers: default_schedulers(),
            limits: RunLimits::default(),
            workload: WorkloadSource::default(),
        }
    }
}

impl SimConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: SimConfig = serde_json::from_str(&content)?;
        config.validate()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), SimError> {
        let cluster = &self.cluster;
        if cluster.nodes == 0 {
            return Err(SimError::config("cluster needs at least one node"));
        }
        if cluster.cores_per_node == 0 || cluster.cores_per_node % 2 != 0 {
            return Err(SimError::config(format!(
                "cores_per_node must be positive and even, got {}",
                cluster.cores_per_node
            )));
        }
        if cluster.nodes.checked_mul(cluster.cores_per_node).is_none() {
            return Err(SimError::config("total core count overflows"));
        }
        if cluster.queue_capacity == Some(0) {
            return Err(SimError::config("queue_capacity must be positive when set"));
        }

        if self.schedulers.is_empty() {
            return Err(SimError::config("no schedulers configured"));
        }
        for spec in &self.schedulers {
            spec.build()?;
        }

        if self.limits.max_steps == Some(0) {
            return Err(SimError::config("max_steps must be positive when set"));
        }
        if let Some(max) = self.limits.max_makespan {
            if !(max.is_finite() && max > 0.0) {
                return Err(SimError::config(format!("invalid max_makespan {max}")));
            }
        }

        if let WorkloadSource::Generate {
            mean_inter_arrival, ..
        } = &self.workload
        {
            if !(mean_inter_arrival.is_finite() && *mean_inter_arrival >= 0.0) {
                return Err(SimError::config(format!(
                    "invalid mean_inter_arrival {mean_inter_arrival}"
                )));
            }
        }
        if let WorkloadSource::Keys { keys, .. } = &self.workload {
            if let Some(key) = keys.iter().find(|k| !(k.arrival_time.is_finite() && k.arrival_time >= 0.0)) {
                return Err(SimError::config(format!(
                    "invalid arrival time {} for load '{}'",
                    key.arrival_time, key.load
                )));
            }
        }

        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: SimConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SimConfig::default());
        assert_eq!(config.cluster.nodes, 16);
        assert_eq!(config.schedulers.len(), 3);
        config.validate().unwrap();
    }

    #[test]
    fn test_full_document() {
        let json = r#"{
            "cluster": {"nodes": 4, "cores_per_node": 16, "queue_capacity": 10},
            "policy": "shallow",
            "schedulers": [
                {"kind": "easy"},
                {"kind": "ranks", "threshold": 1.05, "ranks_threshold": 1.1}
            ],
            "limits": {"max_steps": 1000},
            "workload": {"kind": "trace", "path": "jobs.json"}
        }"#;
        let config: SimConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.policy, PolicyKind::Shallow);
        assert_eq!(config.cluster.queue_capacity, Some(10));
        assert_eq!(config.limits.max_steps, Some(1000));
        assert_eq!(
            config.workload,
            WorkloadSource::Trace {
                path: PathBuf::from("jobs.json")
            }
        );
    }

    #[test]
    fn test_odd_cores_per_node_rejected() {
        let mut config = SimConfig::default();
        config.cluster.cores_per_node = 15;
        assert!(matches!(config.validate(), Err(SimError::Config(_))));
    }

    #[test]
    fn test_invalid_sections_rejected() {
        let mut config = SimConfig::default();
        config.schedulers.clear();
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.cluster.queue_capacity = Some(0);
        assert!(config.validate().is_err());

        let mut config = SimConfig::default();
        config.schedulers = vec![SchedulerSpec::Ranks {
            threshold: 1.2,
            ranks_threshold: 1.0,
            matching: Matching::Optimal,
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generated_source_loads() {
        let source = WorkloadSource::Generate {
            catalog: None,
            jobs: 12,
            mean_inter_arrival: 5.0,
            seed: 3,
        };
        let jobs = source.load().unwrap();
        assert_eq!(jobs.len(), 12);
    }

    #[test]
    fn test_keys_source_loads_named_jobs() {
        let json = r#"{
            "workload": {
                "kind": "keys",
                "keys": [
                    {"load": "cg.C.16", "arrival_time": 10.0},
                    {"load": "bt.C.16"}
                ]
            }
        }"#;
        let config: SimConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        let jobs = config.workload.load().unwrap();
        let names: Vec<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["cg.C.16", "bt.C.16"]);
        assert_eq!(jobs[0].arrival_time, 10.0);
        assert_eq!(jobs[1].arrival_time, 0.0);
    }

    #[test]
    fn test_keys_source_rejects_unknown_and_negative() {
        let unknown = WorkloadSource::Keys {
            catalog: None,
            keys: vec![KeyedArrival {
                load: "is.D.64".to_string(),
                arrival_time: 0.0,
            }],
        };
        assert!(matches!(unknown.load(), Err(EngineError::Core(SimError::Config(_)))));

        let mut config = SimConfig::default();
        config.workload = WorkloadSource::Keys {
            catalog: None,
            keys: vec![KeyedArrival {
                load: "bt.C.16".to_string(),
                arrival_time: -1.0,
            }],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_saved_config_reloads() {
        let path = std::env::temp_dir().join(format!("cosched-config-{}.json", std::process::id()));
        let mut config = SimConfig::default();
        config.cluster.nodes = 4;
        config.policy = PolicyKind::Shallow;
        config.save(&path).unwrap();

        let loaded = SimConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_trace_is_io_error() {
        let source = WorkloadSource::Trace {
            path: PathBuf::from("/nonexistent/trace.json"),
        };
        assert!(matches!(source.load(), Err(EngineError::Io(_))));
    }
}
