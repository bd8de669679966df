//! Candidate-pair culling ahead of the exact disk tests.
//!
//! Both strategies return the same pairs: every `(i, j)` with `i < j` whose
//! bounding circles touch, in ascending lexicographic order. The grid only
//! changes how many pairs are looked at, never which ones come out.

use crate::core::agent::Agent;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Broad-phase strategy for agent/agent candidates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BroadPhase {
    /// Test every pair of agents.
    AllPairs,
    /// Uniform hash grid; `cell_size = None` uses twice the largest bounding radius.
    Grid {
        /// Cell edge length (m). Raised to the largest bounding radius when
        /// smaller, so an agent never spans more than three cells per axis.
        #[serde(default)]
        cell_size: Option<f64>,
    },
}

impl Default for BroadPhase {
    fn default() -> Self {
        BroadPhase::Grid { cell_size: None }
    }
}

#[inline]
fn bounds_touch(a: &Agent, b: &Agent) -> bool {
    let reach = a.bounding_radius() + b.bounding_radius();
    (b.kinematics().position - a.kinematics().position).norm_squared() <= reach * reach
}

impl BroadPhase {
    /// Candidate agent pairs `(i, j)`, `i < j`, sorted.
    pub fn candidate_pairs(&self, agents: &[Agent]) -> Vec<(usize, usize)> {
        match *self {
            BroadPhase::AllPairs => all_pairs(agents),
            BroadPhase::Grid { cell_size } => {
                let largest = agents
                    .iter()
                    .map(Agent::bounding_radius)
                    .fold(0.0, f64::max);
                let cell = cell_size.unwrap_or(2.0 * largest).max(largest);
                if !cell.is_finite() || cell <= 0.0 || agents.len() < 2 {
                    return all_pairs(agents);
                }
                grid_pairs(agents, cell)
            }
        }
    }
}

fn all_pairs(agents: &[Agent]) -> Vec<(usize, usize)> {
    let n = agents.len();
    let mut out = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            if bounds_touch(&agents[i], &agents[j]) {
                out.push((i, j));
            }
        }
    }
    out
}

fn grid_pairs(agents: &[Agent], cell: f64) -> Vec<(usize, usize)> {
    let coord = |x: f64| (x / cell).floor() as i64;

    // Each agent is inserted into every cell its bounding box overlaps.
    let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (i, a) in agents.iter().enumerate() {
        let p = a.kinematics().position;
        let r = a.bounding_radius();
        for cx in coord(p.x - r)..=coord(p.x + r) {
            for cy in coord(p.y - r)..=coord(p.y + r) {
                cells.entry((cx, cy)).or_default().push(i);
            }
        }
    }

    let mut out = Vec::new();
    for members in cells.values() {
        for (k, &i) in members.iter().enumerate() {
            for &j in &members[k + 1..] {
                let (lo, hi) = if i < j { (i, j) } else { (j, i) };
                if bounds_touch(&agents[lo], &agents[hi]) {
                    out.push((lo, hi));
                }
            }
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}
