//! Run parameters and the serde-facing scenario description.
//!
//! [`SimulationConfig`] holds everything that is not per-agent: timestep,
//! stop condition, force-model switches and guard rails. [`Scenario`] bundles
//! it with agents, obstacles and a decision schedule in the shape that is read
//! from JSON; [`Scenario::build`] turns that into validated core types.

use crate::core::agent::{Agent, Body, Drive, Kinematics};
use crate::core::broadphase::BroadPhase;
use crate::core::contact::FrictionModel;
use crate::core::event::{Action, ScheduledAction};
use crate::core::geometry::Disk;
use crate::core::integrator::IntegrationScheme;
use crate::core::material::Material;
use crate::core::obstacle::Obstacle;
use crate::error::{Error, Result};
use crate::population::{bike_body, pedestrian_body, BikeMeasures, Measures};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// When a run ends. The first condition met wins.
///
/// [`Default`] (a 10 s cap) only stands in for a missing `stop` table; fields
/// left out of a given table are unset, not defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopCondition {
    /// Stop once simulation time reaches this value (s).
    #[serde(default)]
    pub max_time: Option<f64>,
    /// Stop after this many steps.
    #[serde(default)]
    pub max_steps: Option<u64>,
    /// Stop as soon as every agent has reached its point goal.
    #[serde(default)]
    pub until_all_arrived: bool,
}

impl Default for StopCondition {
    fn default() -> Self {
        Self {
            max_time: Some(10.0),
            max_steps: None,
            until_all_arrived: false,
        }
    }
}

impl StopCondition {
    /// Stop at `max_time` seconds.
    pub fn at_time(max_time: f64) -> Self {
        Self {
            max_time: Some(max_time),
            ..Self::default()
        }
    }

    /// Stop after `max_steps` steps.
    pub fn after_steps(max_steps: u64) -> Self {
        Self {
            max_time: None,
            max_steps: Some(max_steps),
            until_all_arrived: false,
        }
    }

    /// Validate that the run is bounded and the limits are sensible.
    pub fn validate(&self) -> Result<()> {
        if self.max_time.is_none() && self.max_steps.is_none() {
            return Err(Error::config(
                "stop condition needs max_time or max_steps",
            ));
        }
        if let Some(t) = self.max_time {
            if !t.is_finite() || t <= 0.0 {
                return Err(Error::config(format!(
                    "max_time must be finite and > 0, got {t}"
                )));
            }
        }
        if self.max_steps == Some(0) {
            return Err(Error::config("max_steps must be > 0"));
        }
        Ok(())
    }

    /// Whether the run should end after `steps` steps at `time`.
    pub(crate) fn is_met(&self, time: f64, steps: u64, all_arrived: bool, dt: f64) -> bool {
        // Half a step of slack absorbs rounding in `steps * dt`.
        let by_time = self.max_time.is_some_and(|t| time + 0.5 * dt >= t);
        let by_steps = self.max_steps.is_some_and(|n| steps >= n);
        by_time || by_steps || (self.until_all_arrived && all_arrived)
    }
}

/// Guard rails checked after every step. Exceeding one fails the run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityLimits {
    /// Largest admissible linear speed (m/s).
    pub max_speed: f64,
    /// Largest admissible angular speed (rad/s).
    pub max_angular_speed: f64,
    /// Largest admissible overlap depth (m); unchecked when `None`.
    pub max_penetration: Option<f64>,
}

impl Default for StabilityLimits {
    fn default() -> Self {
        Self {
            max_speed: 25.0,
            max_angular_speed: 60.0,
            max_penetration: None,
        }
    }
}

impl StabilityLimits {
    fn validate(&self) -> Result<()> {
        if !(self.max_speed.is_finite() && self.max_speed > 0.0) {
            return Err(Error::config(format!(
                "max_speed must be finite and > 0, got {}",
                self.max_speed
            )));
        }
        if !(self.max_angular_speed.is_finite() && self.max_angular_speed > 0.0) {
            return Err(Error::config(format!(
                "max_angular_speed must be finite and > 0, got {}",
                self.max_angular_speed
            )));
        }
        if let Some(p) = self.max_penetration {
            if !p.is_finite() || p <= 0.0 {
                return Err(Error::config(format!(
                    "max_penetration must be finite and > 0, got {p}"
                )));
            }
        }
        Ok(())
    }
}

/// Global parameters of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fixed timestep (s).
    pub timestep: f64,
    /// When to stop.
    pub stop: StopCondition,
    /// Material for agents and obstacles that do not name one.
    pub default_material: Material,
    /// Tangential force model.
    pub friction: FrictionModel,
    /// Time-stepping scheme.
    pub integrator: IntegrationScheme,
    /// Post-step guard rails.
    pub limits: StabilityLimits,
    /// Distance to a point goal under which an agent counts as arrived (m).
    pub goal_tolerance: f64,
    /// Attach per-contact interactions to every frame.
    pub record_interactions: bool,
    /// Agent/agent candidate culling.
    pub broad_phase: BroadPhase,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timestep: 1.0e-3,
            stop: StopCondition::default(),
            default_material: Material::default(),
            friction: FrictionModel::default(),
            integrator: IntegrationScheme::default(),
            limits: StabilityLimits::default(),
            goal_tolerance: 0.2,
            record_interactions: false,
            broad_phase: BroadPhase::default(),
        }
    }
}

impl SimulationConfig {
    /// Set the timestep.
    #[must_use]
    pub fn with_timestep(mut self, dt: f64) -> Self {
        self.timestep = dt;
        self
    }

    /// Set the stop condition.
    #[must_use]
    pub fn with_stop(mut self, stop: StopCondition) -> Self {
        self.stop = stop;
        self
    }

    /// Set the fallback material.
    #[must_use]
    pub fn with_default_material(mut self, material: Material) -> Self {
        self.default_material = material;
        self
    }

    /// Set the friction model.
    #[must_use]
    pub fn with_friction(mut self, friction: FrictionModel) -> Self {
        self.friction = friction;
        self
    }

    /// Set the integration scheme.
    #[must_use]
    pub fn with_integrator(mut self, scheme: IntegrationScheme) -> Self {
        self.integrator = scheme;
        self
    }

    /// Set the stability limits.
    #[must_use]
    pub fn with_limits(mut self, limits: StabilityLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the goal tolerance.
    #[must_use]
    pub fn with_goal_tolerance(mut self, tolerance: f64) -> Self {
        self.goal_tolerance = tolerance;
        self
    }

    /// Record per-contact interactions in frames.
    #[must_use]
    pub fn recording_interactions(mut self) -> Self {
        self.record_interactions = true;
        self
    }

    /// Set the broad-phase strategy.
    #[must_use]
    pub fn with_broad_phase(mut self, broad_phase: BroadPhase) -> Self {
        self.broad_phase = broad_phase;
        self
    }

    /// Validate every global parameter.
    pub fn validate(&self) -> Result<()> {
        if !self.timestep.is_finite() || self.timestep <= 0.0 {
            return Err(Error::config(format!(
                "timestep must be finite and > 0, got {}",
                self.timestep
            )));
        }
        if !self.goal_tolerance.is_finite() || self.goal_tolerance < 0.0 {
            return Err(Error::config(format!(
                "goal_tolerance must be finite and >= 0, got {}",
                self.goal_tolerance
            )));
        }
        if let BroadPhase::Grid {
            cell_size: Some(cell),
        } = self.broad_phase
        {
            if !cell.is_finite() || cell <= 0.0 {
                return Err(Error::config(format!(
                    "grid cell_size must be finite and > 0, got {cell}"
                )));
            }
        }
        self.stop.validate()?;
        self.limits.validate()?;
        self.friction.validate()?;
        self.default_material
            .validate()
            .map_err(|e| e.within("default material"))
    }
}

/// Shape of an agent in a scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BodyConfig {
    /// One disk centered on the agent.
    Disk {
        /// Radius (m).
        radius: f64,
    },
    /// Arbitrary rigid union of disks.
    Disks {
        /// Disks in the agent frame.
        disks: Vec<Disk>,
    },
    /// Five-disk pedestrian built from body measures.
    Pedestrian {
        /// Anthropometric measures.
        measures: Measures,
    },
    /// Bike frame and handlebar built from bike dimensions.
    Bike {
        /// Bike dimensions.
        measures: BikeMeasures,
    },
}

impl BodyConfig {
    fn build(&self) -> Result<Body> {
        match self {
            BodyConfig::Disk { radius } => Body::disk(*radius),
            BodyConfig::Disks { disks } => Body::new(disks.clone()),
            BodyConfig::Pedestrian { measures } => pedestrian_body(measures),
            BodyConfig::Bike { measures } => bike_body(measures),
        }
    }
}

fn zero_vector() -> Vector2<f64> {
    Vector2::zeros()
}

/// One agent in a scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique id.
    pub id: u32,
    /// Body shape.
    pub body: BodyConfig,
    /// Mass (kg). Defaults to the measured weight for pedestrian and bike bodies.
    #[serde(default)]
    pub mass: Option<f64>,
    /// Moment of inertia (kg·m²). Derived from the body when absent.
    #[serde(default)]
    pub inertia: Option<f64>,
    /// Initial center.
    pub position: Point2<f64>,
    /// Initial heading (rad).
    #[serde(default)]
    pub orientation: f64,
    /// Initial velocity.
    #[serde(default = "zero_vector")]
    pub velocity: Vector2<f64>,
    /// Initial angular velocity.
    #[serde(default)]
    pub angular_velocity: f64,
    /// Self-propulsion.
    #[serde(default)]
    pub drive: Drive,
    /// Name of an entry in the scenario's material table.
    #[serde(default)]
    pub material: Option<String>,
}

/// One obstacle in a scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleConfig {
    /// Unique id.
    pub id: u32,
    /// Polyline vertices; repeat the first vertex to close it.
    pub vertices: Vec<Point2<f64>>,
    /// Name of an entry in the scenario's material table.
    #[serde(default)]
    pub material: Option<String>,
}

/// A timed decision in a scenario file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Due time (s).
    pub time: f64,
    /// Target agent id.
    pub agent: u32,
    /// The change.
    pub action: Action,
}

/// Everything needed to start a run, as stored on disk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scenario {
    /// Global parameters.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Named materials referenced by agents and obstacles.
    #[serde(default)]
    pub materials: BTreeMap<String, Material>,
    /// Agents, in arena order.
    pub agents: Vec<AgentConfig>,
    /// Static obstacles.
    #[serde(default)]
    pub obstacles: Vec<ObstacleConfig>,
    /// Decisions applied between steps.
    #[serde(default)]
    pub schedule: Vec<ActionConfig>,
}

/// Validated core objects produced by [`Scenario::build`].
#[derive(Debug, Clone)]
pub struct BuiltScenario {
    /// Agents, in scenario order.
    pub agents: Vec<Agent>,
    /// Obstacles, in scenario order.
    pub obstacles: Vec<Obstacle>,
    /// Scheduled actions, in scenario order.
    pub schedule: Vec<ScheduledAction>,
}

impl Scenario {
    /// Parse a scenario from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a scenario file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn material(&self, name: Option<&str>) -> Result<Material> {
        match name {
            None => Ok(self.simulation.default_material),
            Some(n) => {
                let m = self
                    .materials
                    .get(n)
                    .copied()
                    .ok_or_else(|| Error::config(format!("unknown material '{n}'")))?;
                m.validate().map_err(|e| e.within(format!("material '{n}'")))?;
                Ok(m)
            }
        }
    }

    /// Resolve materials and bodies and validate every entity.
    pub fn build(&self) -> Result<BuiltScenario> {
        let agents = self
            .agents
            .iter()
            .map(|a| self.build_agent(a))
            .collect::<Result<Vec<_>>>()?;
        let obstacles = self
            .obstacles
            .iter()
            .map(|o| {
                let material = self
                    .material(o.material.as_deref())
                    .map_err(|e| e.within(format!("obstacle {}", o.id)))?;
                Obstacle::new(o.id, o.vertices.clone(), material)
            })
            .collect::<Result<Vec<_>>>()?;
        let schedule = self
            .schedule
            .iter()
            .map(|s| ScheduledAction::new(s.time, s.agent, s.action))
            .collect::<Result<Vec<_>>>()?;
        Ok(BuiltScenario {
            agents,
            obstacles,
            schedule,
        })
    }

    fn build_agent(&self, cfg: &AgentConfig) -> Result<Agent> {
        let tag = |e: Error| e.within(format!("agent {}", cfg.id));
        let body = cfg.body.build().map_err(tag)?;
        let mass = match (&cfg.mass, &cfg.body) {
            (Some(m), _) => *m,
            (None, BodyConfig::Pedestrian { measures }) => measures.weight,
            (None, BodyConfig::Bike { measures }) => measures.weight,
            (None, _) => {
                return Err(Error::config(format!(
                    "agent {}: mass is required for bodies without measures",
                    cfg.id
                )))
            }
        };
        let material = self.material(cfg.material.as_deref()).map_err(tag)?;
        let kinematics = Kinematics {
            position: cfg.position,
            orientation: cfg.orientation,
            velocity: cfg.velocity,
            angular_velocity: cfg.angular_velocity,
        };
        Agent::new(
            cfg.id,
            body,
            mass,
            cfg.inertia,
            kinematics,
            cfg.drive,
            material,
        )
    }
}
