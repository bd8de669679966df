use crate::core::agent::{Goal, Wrench};
use crate::error::{Error, Result};
use ordered_float::NotNan;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// What a decision layer can change about an agent between steps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Replace the agent's goal.
    SetGoal {
        /// The new goal.
        goal: Goal,
    },
    /// Replace the agent's desired speed.
    SetDesiredSpeed {
        /// The new speed (m/s).
        speed: f64,
    },
    /// Replace the external force/torque applied on top of the driving force.
    SetPrescribedWrench {
        /// The new prescribed wrench.
        wrench: Wrench,
    },
}

/// An action due at a given simulation time for the agent with a given id.
///
/// Ordering is by time, then by scheduling sequence number, so actions due at
/// the same time are applied in the order they were scheduled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledAction {
    /// Due time (finite, non-NaN).
    pub time: NotNan<f64>,
    /// Target agent id.
    pub agent: u32,
    /// The change to apply.
    pub action: Action,
    pub(crate) seq: u64,
}

impl ScheduledAction {
    /// Create a new scheduled action, validating that time is finite and non-negative.
    pub fn new(time: f64, agent: u32, action: Action) -> Result<Self> {
        if time.is_nan() {
            return Err(Error::config("action time cannot be NaN"));
        }
        if !time.is_finite() || time < 0.0 {
            return Err(Error::config(format!(
                "action time must be finite and >= 0, got {time}"
            )));
        }
        let time =
            NotNan::new(time).map_err(|_| Error::config("action time cannot be NaN"))?;
        Ok(Self {
            time,
            agent,
            action,
            seq: 0,
        })
    }

    /// Returns the raw f64 due time.
    #[inline]
    pub fn time_f64(&self) -> f64 {
        self.time.into_inner()
    }
}

impl Eq for ScheduledAction {}

impl Ord for ScheduledAction {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.cmp(&other.time) {
            Ordering::Equal => match self.seq.cmp(&other.seq) {
                Ordering::Equal => self.agent.cmp(&other.agent),
                o => o,
            },
            o => o,
        }
    }
}

impl PartialOrd for ScheduledAction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
