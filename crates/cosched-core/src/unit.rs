//! Execution units: fixed groups of job slots whose occupants interfere
//!
//! Interference inside a unit is resolved around its dominant job (the
//! occupant with the most bound cores, first one wins ties):
//! - every other occupant runs at its speedup against the dominant job
//! - the dominant job runs at its worst speedup against any co-located job
//! - a lone occupant next to empty slots runs spread at its max speedup
//! - a lone occupant of a unit with no empty slot runs at 1.0

use crate::error::{Result, SimError};
use crate::job::Job;
use crate::types::{JobId, UnitId};

/// One position inside an execution unit
#[derive(Debug, Clone)]
pub enum Slot {
    Empty,
    Occupied(Job),
}

impl Slot {
    pub fn job(&self) -> Option<&Job> {
        match self {
            Slot::Occupied(job) => Some(job),
            Slot::Empty => None,
        }
    }

    pub fn job_mut(&mut self) -> Option<&mut Job> {
        match self {
            Slot::Occupied(job) => Some(job),
            Slot::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }
}

/// Group of co-located job slots
#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    id: UnitId,
    slots: Vec<Slot>,
    core_capacity: u32,
    /// Cores of jobs that finished here and have not been handed back yet
    vacated_cores: u32,
}

impl ExecutionUnit {
    /// Create a unit with `width` empty slots
    pub fn new(id: UnitId, width: usize, core_capacity: u32) -> Self {
        ExecutionUnit {
            id,
            slots: (0..width).map(|_| Slot::Empty).collect(),
            core_capacity,
            vacated_cores: 0,
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn width(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn core_capacity(&self) -> u32 {
        self.core_capacity
    }

    /// True when every slot holds a job
    pub fn is_filled(&self) -> bool {
        self.slots.iter().all(|slot| !slot.is_empty())
    }

    /// True when no slot holds a job
    pub fn is_vacant(&self) -> bool {
        self.slots.iter().all(Slot::is_empty)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> + '_ {
        self.slots.iter().filter_map(Slot::job)
    }

    pub fn jobs_mut(&mut self) -> impl Iterator<Item = &mut Job> + '_ {
        self.slots.iter_mut().filter_map(Slot::job_mut)
    }

    pub fn job_at_mut(&mut self, idx: usize) -> Option<&mut Job> {
        self.slots.get_mut(idx).and_then(Slot::job_mut)
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs().map(|job| job.id).collect()
    }

    pub fn occupied_count(&self) -> usize {
        self.jobs().count()
    }

    /// Cores bound by the jobs currently running here
    pub fn bound_cores(&self) -> u32 {
        self.jobs().map(|job| job.binded_cores).sum()
    }

    /// Cores still bindable inside this unit
    pub fn free_capacity(&self) -> u32 {
        self.core_capacity.saturating_sub(self.bound_cores())
    }

    pub fn vacated_cores(&self) -> u32 {
        self.vacated_cores
    }

    /// The dominant job: most bound cores, first seen wins ties
    pub fn dominant(&self) -> Option<&Job> {
        self.dominant_index().and_then(|idx| self.slots[idx].job())
    }

    fn dominant_index(&self) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        for (idx, slot) in self.slots.iter().enumerate() {
            if let Slot::Occupied(job) = slot {
                match best {
                    Some((_, cores)) if job.binded_cores <= cores => {}
                    _ => best = Some((idx, job.binded_cores)),
                }
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Put a job into the first empty slot
    ///
    /// Capacity is checked here; cluster-wide core accounting is the caller's.
    pub fn insert(&mut self, job: Job) -> Result<usize> {
        if job.binded_cores > self.free_capacity() {
            return Err(SimError::CapacityExceeded {
                need: job.binded_cores,
                have: self.free_capacity(),
            });
        }

        let idx = self
            .slots
            .iter()
            .position(Slot::is_empty)
            .ok_or(SimError::CapacityExceeded { need: 1, have: 0 })?;

        self.slots[idx] = Slot::Occupied(job);
        Ok(idx)
    }

    /// Empty the slot at `idx`, returning the finished job
    ///
    /// Its bound cores are recorded as vacated until `take_vacated_cores`.
    pub fn vacate(&mut self, idx: usize) -> Option<Job> {
        let slot = self.slots.get_mut(idx)?;
        match std::mem::replace(slot, Slot::Empty) {
            Slot::Occupied(job) => {
                self.vacated_cores += job.binded_cores;
                Some(job)
            }
            Slot::Empty => None,
        }
    }

    /// Hand back the cores of finished jobs, exactly once
    pub fn take_vacated_cores(&mut self) -> u32 {
        std::mem::take(&mut self.vacated_cores)
    }

    /// Drop every empty slot and shrink capacity to the running jobs
    pub fn compact(&mut self) {
        self.slots.retain(|slot| !slot.is_empty());
        self.core_capacity = self.bound_cores();
    }

    /// Recompute every occupant's speedup for the current co-location
    ///
    /// Must run whenever the occupied set changes. Idempotent.
    pub fn resolve_interference(&mut self) -> Result<()> {
        let Some(dominant_idx) = self.dominant_index() else {
            return Ok(());
        };

        let has_empty_slot = self.slots.iter().any(Slot::is_empty);

        let others: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(idx, slot)| *idx != dominant_idx && !slot.is_empty())
            .map(|(idx, _)| idx)
            .collect();

        if others.is_empty() {
            let Some(job) = self.slots[dominant_idx].job_mut() else {
                return Ok(());
            };
            let factor = if has_empty_slot { job.max_speedup() } else { 1.0 };
            job.apply_speedup(factor)?;
            return Ok(());
        }

        let Some(dominant) = self.slots[dominant_idx].job() else {
            return Ok(());
        };

        // Look up every factor before rescaling anyone
        let mut worst: Option<f64> = None;
        let mut factors = Vec::with_capacity(others.len());
        for &idx in &others {
            if let Some(co_job) = self.slots[idx].job() {
                let factor = dominant.speedup_against(&co_job.name)?;
                worst = Some(worst.map_or(factor, |w: f64| w.min(factor)));
                factors.push((idx, co_job.speedup_against(&dominant.name)?));
            }
        }

        for (idx, factor) in factors {
            if let Some(job) = self.slots[idx].job_mut() {
                job.apply_speedup(factor)?;
            }
        }

        if let (Some(factor), Some(dominant)) = (worst, self.slots[dominant_idx].job_mut()) {
            dominant.apply_speedup(factor)?;
        }

        Ok(())
    }
}
