//! Unit-to-job matching for co-location backfill
//!
//! Rows are execution units with a free slot, columns are waiting jobs. A cell
//! holds the mutual speedup of the pairing, or `None` when the job cannot go
//! into that unit. Each unit receives at most one job and each job goes to at
//! most one unit.

use pathfinding::matrix::Matrix;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Weight used for infeasible and padding cells
const INFEASIBLE: i64 = -1_000_000_000;

/// How candidate jobs are matched to open units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Matching {
    /// Maximum total mutual speedup (Kuhn-Munkres)
    #[default]
    Optimal,
    /// Each unit takes its first feasible job in queue order
    FirstFit,
}

impl Matching {
    /// Returns `(row, column)` pairs
    pub fn plan(self, weights: &[Vec<Option<f64>>], columns: usize) -> Vec<(usize, usize)> {
        match self {
            Matching::Optimal => plan_optimal(weights, columns),
            Matching::FirstFit => plan_first_fit(weights, columns),
        }
    }
}

/// Maximum-weight assignment over a padded square matrix
///
/// Weights are scaled to integers (three decimals) for the solver.
pub fn plan_optimal(weights: &[Vec<Option<f64>>], columns: usize) -> Vec<(usize, usize)> {
    let rows = weights.len();
    if rows == 0 || columns == 0 {
        return Vec::new();
    }

    let size = rows.max(columns);
    let cells: Vec<i64> = (0..size)
        .flat_map(|row| {
            (0..size).map(move |col| {
                match weights.get(row).and_then(|r| r.get(col)).copied().flatten() {
                    Some(weight) => (weight * 1000.0) as i64,
                    None => INFEASIBLE,
                }
            })
        })
        .collect();

    let matrix = match Matrix::from_vec(size, size, cells) {
        Ok(matrix) => matrix,
        Err(err) => {
            warn!("Weight matrix rejected ({err}), falling back to first-fit matching");
            return plan_first_fit(weights, columns);
        }
    };

    let (_total, assignment) = pathfinding::kuhn_munkres::kuhn_munkres(&matrix);

    assignment
        .into_iter()
        .enumerate()
        .filter(|&(row, col)| {
            row < rows
                && col < columns
                && weights[row].get(col).copied().flatten().is_some()
        })
        .collect()
}

/// Greedy baseline: units in order, first unused feasible job
pub fn plan_first_fit(weights: &[Vec<Option<f64>>], columns: usize) -> Vec<(usize, usize)> {
    let mut taken = vec![false; columns];
    let mut plan = Vec::new();

    for (row, cells) in weights.iter().enumerate() {
        let pick = cells
            .iter()
            .take(columns)
            .enumerate()
            .find(|&(col, cell)| cell.is_some() && !taken[col])
            .map(|(col, _)| col);

        if let Some(col) = pick {
            taken[col] = true;
            plan.push((row, col));
        }
    }

    plan
}
