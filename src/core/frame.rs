//! Post-step snapshots handed to trajectory writers and host adapters.

use crate::core::agent::{Agent, Wrench};
use crate::core::contact::{ContactForce, ContactPair};
use crate::core::obstacle::Obstacle;
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Kinematic state of one agent after a step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Agent id.
    pub id: u32,
    /// Agent center.
    pub position: Point2<f64>,
    /// Heading (rad).
    pub orientation: f64,
    /// Linear velocity.
    pub velocity: Vector2<f64>,
    /// Angular velocity.
    pub angular_velocity: f64,
    /// Net contact force that acted during the step.
    pub contact_force: Vector2<f64>,
    /// Net contact torque that acted during the step.
    pub contact_torque: f64,
    /// Point goal reached.
    pub arrived: bool,
}

impl AgentState {
    pub(crate) fn capture(agent: &Agent, contact: &Wrench, goal_tolerance: f64) -> Self {
        let k = agent.kinematics();
        Self {
            id: agent.id(),
            position: k.position,
            orientation: k.orientation,
            velocity: k.velocity,
            angular_velocity: k.angular_velocity,
            contact_force: contact.force,
            contact_torque: contact.torque,
            arrived: agent.has_arrived(goal_tolerance),
        }
    }
}

/// The other side of an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counterpart {
    /// Another agent, by id.
    Agent(u32),
    /// An obstacle, by id.
    Obstacle(u32),
}

/// One active contact, expressed with ids rather than arena indices.
///
/// Forces are those acting on `agent`; the counterpart receives the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Agent receiving `normal_force` and `tangential_force`.
    pub agent: u32,
    /// Disk index within that agent's body.
    pub disk: usize,
    /// What it touches.
    pub counterpart: Counterpart,
    /// Contact point.
    pub point: Point2<f64>,
    /// Overlap depth.
    pub depth: f64,
    /// Normal force on `agent`.
    pub normal_force: Vector2<f64>,
    /// Friction force on `agent`.
    pub tangential_force: Vector2<f64>,
}

impl Interaction {
    pub(crate) fn from_force(f: &ContactForce, agents: &[Agent], obstacles: &[Obstacle]) -> Self {
        let c = &f.contact;
        match c.pair {
            // Report from the point of view of body B, which receives `f` as is.
            ContactPair::AgentAgent { a, b } => Self {
                agent: agents[b.agent].id(),
                disk: b.disk,
                counterpart: Counterpart::Agent(agents[a.agent].id()),
                point: c.point,
                depth: c.depth,
                normal_force: f.normal_force,
                tangential_force: f.tangential_force,
            },
            ContactPair::AgentObstacle {
                agent, obstacle, ..
            } => Self {
                agent: agents[agent.agent].id(),
                disk: agent.disk,
                counterpart: Counterpart::Obstacle(obstacles[obstacle].id()),
                point: c.point,
                depth: c.depth,
                normal_force: f.normal_force,
                tangential_force: f.tangential_force,
            },
        }
    }
}

/// Snapshot of every agent after a step (or at construction for step 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Number of completed steps.
    pub step: u64,
    /// Simulation time.
    pub time: f64,
    /// One entry per agent, in arena order.
    pub agents: Vec<AgentState>,
    /// Contacts active during the step; empty unless interaction recording is on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactions: Vec<Interaction>,
}

impl Frame {
    /// State of the agent with `id`, if present.
    pub fn agent(&self, id: u32) -> Option<&AgentState> {
        self.agents.iter().find(|a| a.id == id)
    }
}
