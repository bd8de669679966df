use crate::core::geometry::{cross, wrap_angle, Disk};
use crate::core::material::Material;
use crate::error::{Error, Result};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::ops::{Add, AddAssign};

/// Rigid union of disks making up an agent, in the agent's local frame.
///
/// Local `+x` is the facing direction; for pedestrians the shoulder line runs
/// along local `y`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Body {
    disks: Vec<Disk>,
}

impl Body {
    /// Create a body from at least one validated disk.
    pub fn new(disks: Vec<Disk>) -> Result<Self> {
        if disks.is_empty() {
            return Err(Error::config("body must contain at least one disk"));
        }
        for d in &disks {
            Disk::new(d.offset, d.radius)?;
        }
        Ok(Self { disks })
    }

    /// Single disk centered on the agent.
    pub fn disk(radius: f64) -> Result<Self> {
        Self::new(vec![Disk::new(Vector2::zeros(), radius)?])
    }

    /// The disks, in body order.
    #[inline]
    pub fn disks(&self) -> &[Disk] {
        &self.disks
    }

    /// Radius of the smallest circle around the agent center enclosing every disk.
    pub fn bounding_radius(&self) -> f64 {
        self.disks
            .iter()
            .map(|d| d.offset.norm() + d.radius)
            .fold(0.0, f64::max)
    }

    /// Moment of inertia about the agent center for a body of mass `mass`
    /// spread uniformly over the disk areas.
    pub fn moment_of_inertia(&self, mass: f64) -> f64 {
        let total_area: f64 = self.disks.iter().map(|d| PI * d.radius * d.radius).sum();
        self.disks
            .iter()
            .map(|d| {
                let m_i = mass * PI * d.radius * d.radius / total_area;
                m_i * (0.5 * d.radius * d.radius + d.offset.norm_squared())
            })
            .sum()
    }
}

/// Where an agent is heading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    /// Walk toward a fixed point and stop within the goal tolerance.
    Point(Point2<f64>),
    /// Walk along a fixed direction indefinitely (normalized on construction).
    Direction(Vector2<f64>),
    /// No self-propulsion; the agent only reacts to contacts and prescribed forces.
    None,
}

impl Goal {
    pub(crate) fn validated(self) -> Result<Self> {
        match self {
            Goal::Point(p) => {
                if !p.iter().all(|x| x.is_finite()) {
                    return Err(Error::config("goal point must be finite"));
                }
                Ok(self)
            }
            Goal::Direction(d) => {
                let n = d.norm();
                if !n.is_finite() || n <= 0.0 {
                    return Err(Error::config("goal direction must be finite and non-zero"));
                }
                Ok(Goal::Direction(d / n))
            }
            Goal::None => Ok(self),
        }
    }
}

/// Self-propulsion parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Drive {
    /// Current goal.
    pub goal: Goal,
    /// Desired walking speed (m/s, >= 0).
    pub desired_speed: f64,
    /// Translational relaxation time τ (s, > 0).
    pub relaxation_time: f64,
    /// Rotational relaxation time τ_rot (s, > 0).
    pub rotational_relaxation_time: f64,
}

impl Default for Drive {
    fn default() -> Self {
        Self {
            goal: Goal::None,
            desired_speed: 1.3,
            relaxation_time: 0.5,
            rotational_relaxation_time: 0.5,
        }
    }
}

impl Drive {
    /// Drive toward `goal` with the default speed and relaxation times.
    pub fn toward(goal: Goal) -> Self {
        Self {
            goal,
            ..Self::default()
        }
    }

    pub(crate) fn validated(mut self) -> Result<Self> {
        self.goal = self.goal.validated()?;
        if !self.desired_speed.is_finite() || self.desired_speed < 0.0 {
            return Err(Error::config(format!(
                "desired speed must be finite and >= 0, got {}",
                self.desired_speed
            )));
        }
        if !self.relaxation_time.is_finite() || self.relaxation_time <= 0.0 {
            return Err(Error::config(format!(
                "relaxation time must be finite and > 0, got {}",
                self.relaxation_time
            )));
        }
        if !self.rotational_relaxation_time.is_finite() || self.rotational_relaxation_time <= 0.0
        {
            return Err(Error::config(format!(
                "rotational relaxation time must be finite and > 0, got {}",
                self.rotational_relaxation_time
            )));
        }
        Ok(self)
    }
}

/// Position, orientation and velocities of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kinematics {
    /// Agent center (m).
    pub position: Point2<f64>,
    /// Heading of the local `+x` axis (rad, in (-π, π]).
    pub orientation: f64,
    /// Linear velocity (m/s).
    pub velocity: Vector2<f64>,
    /// Angular velocity (rad/s, counter-clockwise positive).
    pub angular_velocity: f64,
}

impl Default for Kinematics {
    fn default() -> Self {
        Self::at(Point2::origin())
    }
}

impl Kinematics {
    /// At rest at `position`, facing `+x`.
    pub fn at(position: Point2<f64>) -> Self {
        Self {
            position,
            orientation: 0.0,
            velocity: Vector2::zeros(),
            angular_velocity: 0.0,
        }
    }

    /// Set the facing direction.
    #[must_use]
    pub fn facing(mut self, orientation: f64) -> Self {
        self.orientation = wrap_angle(orientation);
        self
    }

    /// Set the initial linear velocity.
    #[must_use]
    pub fn moving(mut self, velocity: Vector2<f64>) -> Self {
        self.velocity = velocity;
        self
    }

    /// All components finite.
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|x| x.is_finite())
            && self.orientation.is_finite()
            && self.velocity.iter().all(|x| x.is_finite())
            && self.angular_velocity.is_finite()
    }

    /// Velocity of the material point at world position `p`.
    #[inline]
    pub fn point_velocity(&self, p: &Point2<f64>) -> Vector2<f64> {
        let r = p - self.position;
        self.velocity + Vector2::new(-r.y, r.x) * self.angular_velocity
    }
}

/// Planar force plus torque about the agent center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wrench {
    /// Force (N).
    pub force: Vector2<f64>,
    /// Torque (N·m, counter-clockwise positive).
    pub torque: f64,
}

impl Default for Wrench {
    fn default() -> Self {
        Self::zero()
    }
}

impl Wrench {
    /// Zero force and torque.
    pub fn zero() -> Self {
        Self {
            force: Vector2::zeros(),
            torque: 0.0,
        }
    }

    /// Wrench produced by `force` applied at world point `point` on a body centered at `center`.
    #[inline]
    pub fn at_point(force: Vector2<f64>, point: &Point2<f64>, center: &Point2<f64>) -> Self {
        Self {
            force,
            torque: cross(&(point - center), &force),
        }
    }

    /// All components finite.
    pub fn is_finite(&self) -> bool {
        self.force.iter().all(|x| x.is_finite()) && self.torque.is_finite()
    }
}

impl Add for Wrench {
    type Output = Wrench;
    fn add(self, rhs: Wrench) -> Wrench {
        Wrench {
            force: self.force + rhs.force,
            torque: self.torque + rhs.torque,
        }
    }
}

impl AddAssign for Wrench {
    fn add_assign(&mut self, rhs: Wrench) {
        self.force += rhs.force;
        self.torque += rhs.torque;
    }
}

/// A pedestrian agent: rigid multi-disk body with its own goal and material.
///
/// Body, mass and inertia are fixed at construction; the kinematics are only
/// ever replaced by the simulation loop when it commits a step.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    id: u32,
    body: Body,
    mass: f64,
    inertia: f64,
    bounding_radius: f64,
    material: Material,
    pub(crate) kinematics: Kinematics,
    pub(crate) drive: Drive,
    pub(crate) prescribed: Wrench,
}

impl Agent {
    /// Create a new agent after validating invariants.
    ///
    /// `inertia = None` derives the moment of inertia from the body (see
    /// [`Body::moment_of_inertia`]).
    ///
    /// Errors:
    /// - `Error::InvalidConfiguration` naming the agent id if the mass or
    ///   inertia is non-positive, any kinematic component is NaN/inf, or the
    ///   drive or material parameters are invalid.
    pub fn new(
        id: u32,
        body: Body,
        mass: f64,
        inertia: Option<f64>,
        kinematics: Kinematics,
        drive: Drive,
        material: Material,
    ) -> Result<Self> {
        let tag = |e: Error| e.within(format!("agent {id}"));
        if !mass.is_finite() || mass <= 0.0 {
            return Err(Error::config(format!(
                "agent {id}: mass must be finite and > 0, got {mass}"
            )));
        }
        let inertia = inertia.unwrap_or_else(|| body.moment_of_inertia(mass));
        if !inertia.is_finite() || inertia <= 0.0 {
            return Err(Error::config(format!(
                "agent {id}: moment of inertia must be finite and > 0, got {inertia}"
            )));
        }
        if !kinematics.is_finite() {
            return Err(Error::config(format!(
                "agent {id}: initial kinematics must be finite"
            )));
        }
        let drive = drive.validated().map_err(tag)?;
        material.validate().map_err(tag)?;
        let bounding_radius = body.bounding_radius();
        Ok(Self {
            id,
            body,
            mass,
            inertia,
            bounding_radius,
            material,
            kinematics: Kinematics {
                orientation: wrap_angle(kinematics.orientation),
                ..kinematics
            },
            drive,
            prescribed: Wrench::zero(),
        })
    }

    /// Stable agent identifier.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Body shape.
    #[inline]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Mass (kg).
    #[inline]
    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// Moment of inertia about the agent center (kg·m²).
    #[inline]
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    /// Precomputed bounding radius used for culling.
    #[inline]
    pub fn bounding_radius(&self) -> f64 {
        self.bounding_radius
    }

    /// Surface material.
    #[inline]
    pub fn material(&self) -> &Material {
        &self.material
    }

    /// Current kinematic state.
    #[inline]
    pub fn kinematics(&self) -> &Kinematics {
        &self.kinematics
    }

    /// Current self-propulsion parameters.
    #[inline]
    pub fn drive(&self) -> &Drive {
        &self.drive
    }

    /// External wrench currently prescribed by a decision layer.
    #[inline]
    pub fn prescribed(&self) -> &Wrench {
        &self.prescribed
    }

    /// World-frame disk centers, in body order.
    pub fn disk_centers(&self) -> impl Iterator<Item = Point2<f64>> + '_ {
        let k = &self.kinematics;
        self.body
            .disks()
            .iter()
            .map(move |d| d.world_center(&k.position, k.orientation))
    }

    /// Returns the agent's kinetic energy: 1/2 m |v|^2 + 1/2 I ω^2.
    #[inline]
    pub fn kinetic_energy(&self) -> f64 {
        let k = &self.kinematics;
        0.5 * self.mass * k.velocity.norm_squared()
            + 0.5 * self.inertia * k.angular_velocity * k.angular_velocity
    }

    /// Point goal reached within `tolerance`.
    pub fn has_arrived(&self, tolerance: f64) -> bool {
        match self.drive.goal {
            Goal::Point(p) => (p - self.kinematics.position).norm() <= tolerance,
            Goal::Direction(_) | Goal::None => false,
        }
    }

    pub(crate) fn set_goal(&mut self, goal: Goal) -> Result<()> {
        self.drive.goal = goal.validated()?;
        Ok(())
    }

    pub(crate) fn set_desired_speed(&mut self, speed: f64) -> Result<()> {
        self.drive = Drive {
            desired_speed: speed,
            ..self.drive
        }
        .validated()?;
        Ok(())
    }

    pub(crate) fn set_prescribed(&mut self, wrench: Wrench) -> Result<()> {
        if !wrench.is_finite() {
            return Err(Error::config(format!(
                "agent {}: prescribed force and torque must be finite",
                self.id
            )));
        }
        self.prescribed = wrench;
        Ok(())
    }
}
