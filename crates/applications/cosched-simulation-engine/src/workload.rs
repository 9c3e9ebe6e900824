//! Workload loading and synthetic generation
//!
//! Traces are JSON documents listing jobs with their arrival times and
//! speedup tables. Synthetic workloads are drawn from a catalog of measured
//! loads, with exponentially distributed inter-arrival gaps.

use std::collections::BTreeMap;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cosched_core::{Job, SpeedupTable};

use crate::error::{EngineError, Result};

/// Wall-time estimate as a multiple of a load's average runtime
pub const WALL_TIME_FACTOR: f64 = 1.25;

/// One job as written in a workload trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: String,
    pub processes: u32,
    /// Solo runtime in seconds
    pub runtime: f64,
    #[serde(default)]
    pub arrival_time: f64,
    /// User estimate; defaults to `WALL_TIME_FACTOR * runtime`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_time: Option<f64>,
    #[serde(default)]
    pub speedups: SpeedupTable,
}

impl JobDescriptor {
    pub fn into_job(self) -> Job {
        let wall_time = self.wall_time.unwrap_or(WALL_TIME_FACTOR * self.runtime);
        Job::new(
            self.name,
            self.processes,
            self.runtime,
            self.arrival_time,
            wall_time,
            self.speedups,
        )
    }
}

/// A workload trace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub jobs: Vec<JobDescriptor>,
}

impl Workload {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let workload: Workload = serde_json::from_str(&content)?;
        info!(path = %path.display(), jobs = workload.jobs.len(), "Loaded workload trace");
        Ok(workload)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn into_jobs(self) -> Vec<Job> {
        self.jobs.into_iter().map(JobDescriptor::into_job).collect()
    }
}

/// A measured load: one application at one process count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadProfile {
    pub name: String,
    pub processes: u32,
    /// Average solo runtime in seconds
    pub runtime: f64,
    #[serde(default)]
    pub speedups: SpeedupTable,
}

impl LoadProfile {
    fn instantiate(&self, arrival_time: f64) -> JobDescriptor {
        JobDescriptor {
            name: self.name.clone(),
            processes: self.processes,
            runtime: self.runtime,
            arrival_time,
            wall_time: Some(WALL_TIME_FACTOR * self.runtime),
            speedups: self.speedups.clone(),
        }
    }
}

/// One entry of a keys list: a catalog load and when it arrives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedArrival {
    pub load: String,
    #[serde(default)]
    pub arrival_time: f64,
}

/// Loads a generator may draw from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadCatalog {
    pub loads: Vec<LoadProfile>,
}

impl LoadCatalog {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let catalog: LoadCatalog = serde_json::from_str(&content)?;
        info!(path = %path.display(), loads = catalog.loads.len(), "Loaded load catalog");
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<&LoadProfile> {
        self.loads.iter().find(|load| load.name == name)
    }

    /// Build jobs from an explicit list of catalog keys
    pub fn from_keys(&self, keys: &[KeyedArrival]) -> Result<Vec<JobDescriptor>> {
        keys.iter()
            .map(|key| {
                self.get(&key.load)
                    .map(|load| load.instantiate(key.arrival_time))
                    .ok_or_else(|| {
                        EngineError::config(format!("load '{}' is not in the catalog", key.load))
                    })
            })
            .collect()
    }

    /// NAS-style benchmark mix used when no catalog is given
    ///
    /// Compute-bound loads gain from memory-bound neighbours and vice versa;
    /// two loads of the same class contend.
    pub fn builtin() -> Self {
        // (name, processes, runtime, memory bound)
        const LOADS: [(&str, u32, f64, bool); 6] = [
            ("bt.C.16", 16, 180.0, false),
            ("ep.C.16", 16, 60.0, false),
            ("lu.C.16", 16, 150.0, false),
            ("cg.C.16", 16, 120.0, true),
            ("mg.C.32", 32, 45.0, true),
            ("sp.C.32", 32, 200.0, true),
        ];

        let loads = LOADS
            .iter()
            .map(|&(name, processes, runtime, memory_bound)| {
                let entries: BTreeMap<String, f64> = LOADS
                    .iter()
                    .map(|&(co_name, _, _, co_memory_bound)| {
                        let factor = match (memory_bound, co_memory_bound) {
                            (false, true) => 1.25,
                            (true, false) => 1.15,
                            (false, false) => 0.95,
                            (true, true) => 0.75,
                        };
                        (co_name.to_string(), factor)
                    })
                    .collect();

                LoadProfile {
                    name: name.to_string(),
                    processes,
                    runtime,
                    speedups: SpeedupTable::new(entries).unwrap_or_default(),
                }
            })
            .collect();

        LoadCatalog { loads }
    }
}

/// Draws jobs from a catalog with Poisson arrivals
pub struct WorkloadGenerator {
    catalog: LoadCatalog,
    rng: StdRng,
    /// `None` when every job arrives at time zero
    inter_arrival: Option<Exp<f64>>,
}

impl WorkloadGenerator {
    pub fn new(catalog: LoadCatalog, seed: u64, mean_inter_arrival: f64) -> Result<Self> {
        if catalog.loads.is_empty() {
            return Err(EngineError::config("load catalog is empty"));
        }

        let inter_arrival = if mean_inter_arrival > 0.0 {
            let exp = Exp::new(1.0 / mean_inter_arrival).map_err(|e| {
                EngineError::config(format!("invalid mean inter-arrival {mean_inter_arrival}: {e}"))
            })?;
            Some(exp)
        } else {
            None
        };

        Ok(Self {
            catalog,
            rng: StdRng::seed_from_u64(seed),
            inter_arrival,
        })
    }

    /// Pick `count` loads uniformly at random
    pub fn generate(&mut self, count: usize) -> Vec<JobDescriptor> {
        let mut arrival = 0.0;
        let mut jobs = Vec::with_capacity(count);

        for _ in 0..count {
            let idx = self.rng.gen_range(0..self.catalog.loads.len());
            jobs.push(self.catalog.loads[idx].instantiate(arrival));
            if let Some(exp) = &self.inter_arrival {
                arrival += exp.sample(&mut self.rng);
            }
        }

        debug!(jobs = jobs.len(), last_arrival = arrival, "Generated random workload");
        jobs
    }
}
