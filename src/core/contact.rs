//! Contact resolver: enumerates overlapping disk pairs and turns them into
//! viscoelastic normal forces, friction and torques.
//!
//! Agents and obstacles are addressed by their index in the simulation's
//! arenas; a [`Contact`] only ever holds indices, never references.
//!
//! # Determinism
//!
//! Contacts are enumerated in a fixed order (sorted agent pairs, then agents
//! against obstacles in index order) and per-agent wrenches are summed
//! sequentially in that order. The result is therefore bit-identical whether
//! or not the `parallel` feature is enabled. Reordering the enumeration would
//! only change the floating-point summation order (relative differences of
//! order 1e-15 per contact).

use crate::core::agent::{Agent, Wrench};
use crate::core::broadphase::BroadPhase;
use crate::core::geometry::{disk_disk, disk_segment};
use crate::core::material::ContactLaw;
use crate::core::obstacle::Obstacle;
use crate::error::{Error, Result};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Relative tangential speed below which no friction is produced.
const TANGENTIAL_EPS: f64 = 1e-12;

/// One disk of one agent, by arena index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiskRef {
    /// Index into the agent arena.
    pub agent: usize,
    /// Index into that agent's body.
    pub disk: usize,
}

/// The two bodies taking part in a contact.
///
/// For agent/agent contacts `a.agent < b.agent` always holds. For obstacle
/// contacts the obstacle plays the role of body A.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactPair {
    /// Disk of one agent against a disk of another agent.
    AgentAgent {
        /// Body A.
        a: DiskRef,
        /// Body B.
        b: DiskRef,
    },
    /// Disk of an agent against one segment of an obstacle.
    AgentObstacle {
        /// The agent disk (body B).
        agent: DiskRef,
        /// Index into the obstacle arena.
        obstacle: usize,
        /// Segment index within the obstacle.
        segment: usize,
    },
}

/// A penetrating pair for the current step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// Participants.
    pub pair: ContactPair,
    /// Overlap depth (> 0).
    pub depth: f64,
    /// Unit normal from body A toward body B.
    pub normal: Vector2<f64>,
    /// World contact point.
    pub point: Point2<f64>,
    /// Rate at which the bodies approach along the normal (positive = closing).
    pub approach_velocity: f64,
    /// Tangential velocity of body B relative to body A at the contact point.
    pub tangential_velocity: Vector2<f64>,
    /// Mixed material law for the pair.
    pub law: ContactLaw,
    /// Coincident disk centers; the normal is a fallback and no force is produced.
    pub degenerate: bool,
}

/// How friction depends on the relative tangential velocity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrictionModel {
    /// Full μ·F_n above `stick_velocity`, nothing below.
    Coulomb {
        /// Dead-band half-width (m/s, >= 0).
        stick_velocity: f64,
    },
    /// μ·F_n·tanh(|u_t| / slip_velocity): continuous through zero slip.
    Regularized {
        /// Slip speed at which friction reaches ~76% of its Coulomb bound (m/s, > 0).
        slip_velocity: f64,
    },
}

impl Default for FrictionModel {
    fn default() -> Self {
        FrictionModel::Regularized {
            slip_velocity: 0.01,
        }
    }
}

impl FrictionModel {
    /// Check the model's parameter.
    pub fn validate(&self) -> Result<()> {
        match *self {
            FrictionModel::Coulomb { stick_velocity } => {
                if !stick_velocity.is_finite() || stick_velocity < 0.0 {
                    return Err(Error::config(format!(
                        "friction stick_velocity must be finite and >= 0, got {stick_velocity}"
                    )));
                }
            }
            FrictionModel::Regularized { slip_velocity } => {
                if !slip_velocity.is_finite() || slip_velocity <= 0.0 {
                    return Err(Error::config(format!(
                        "friction slip_velocity must be finite and > 0, got {slip_velocity}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Friction force on body B given its relative tangential velocity `slip`.
    ///
    /// Always opposes `slip`, never exceeds `mu * normal`, and is zero when
    /// `slip` is (numerically) zero.
    pub fn tangential_force(&self, mu: f64, normal: f64, slip: &Vector2<f64>) -> Vector2<f64> {
        let speed = slip.norm();
        if speed <= TANGENTIAL_EPS || mu <= 0.0 || normal <= 0.0 {
            return Vector2::zeros();
        }
        let bound = mu * normal;
        let magnitude = match *self {
            FrictionModel::Coulomb { stick_velocity } => {
                if speed <= stick_velocity {
                    0.0
                } else {
                    bound
                }
            }
            FrictionModel::Regularized { slip_velocity } => bound * (speed / slip_velocity).tanh(),
        };
        -slip * (magnitude / speed)
    }
}

/// Viscoelastic normal force magnitude, clamped to be repulsive.
#[inline]
pub fn normal_force(law: &ContactLaw, depth: f64, approach_velocity: f64) -> f64 {
    if depth <= 0.0 {
        return 0.0;
    }
    (law.stiffness * depth + law.damping * approach_velocity).max(0.0)
}

/// Forces produced by one contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactForce {
    /// The contact.
    pub contact: Contact,
    /// Magnitude of the normal force.
    pub normal_magnitude: f64,
    /// Normal force acting on body B (body A receives the negation).
    pub normal_force: Vector2<f64>,
    /// Friction force acting on body B (body A receives the negation).
    pub tangential_force: Vector2<f64>,
}

impl ContactForce {
    /// Total force on body B.
    #[inline]
    pub fn on_b(&self) -> Vector2<f64> {
        self.normal_force + self.tangential_force
    }
}

/// Contacts, their forces and the per-agent sums for one step.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Every penetrating pair with its forces, in enumeration order.
    pub forces: Vec<ContactForce>,
    /// Net contact wrench per agent, indexed like the agent arena.
    pub wrenches: Vec<Wrench>,
}

impl Resolution {
    /// The deepest contact, if any.
    pub fn deepest(&self) -> Option<&Contact> {
        self.forces
            .iter()
            .map(|f| &f.contact)
            .max_by(|a, b| a.depth.total_cmp(&b.depth))
    }
}

/// Read-only view over one time slice of the agent and obstacle arenas.
#[derive(Debug)]
pub struct ContactResolver<'a> {
    agents: &'a [Agent],
    obstacles: &'a [Obstacle],
    centers: Vec<Vec<Point2<f64>>>,
    friction: FrictionModel,
    broad_phase: BroadPhase,
}

impl<'a> ContactResolver<'a> {
    /// Snapshot world-frame disk centers for the given configuration.
    pub fn new(
        agents: &'a [Agent],
        obstacles: &'a [Obstacle],
        friction: FrictionModel,
        broad_phase: BroadPhase,
    ) -> Self {
        let centers = agents.iter().map(|a| a.disk_centers().collect()).collect();
        Self {
            agents,
            obstacles,
            centers,
            friction,
            broad_phase,
        }
    }

    /// All penetrating pairs, agent/agent first, then agent/obstacle.
    pub fn detect(&self) -> Vec<Contact> {
        let pairs = self.broad_phase.candidate_pairs(self.agents);

        #[cfg(feature = "parallel")]
        let (mut contacts, walls) = {
            use rayon::prelude::*;
            let contacts: Vec<Contact> = pairs
                .par_iter()
                .flat_map_iter(|&(i, j)| self.agent_pair(i, j))
                .collect();
            let walls: Vec<Contact> = (0..self.agents.len())
                .into_par_iter()
                .flat_map_iter(|i| self.agent_obstacles(i))
                .collect();
            (contacts, walls)
        };

        #[cfg(not(feature = "parallel"))]
        let (mut contacts, walls) = {
            let contacts: Vec<Contact> = pairs
                .iter()
                .flat_map(|&(i, j)| self.agent_pair(i, j))
                .collect();
            let walls: Vec<Contact> = (0..self.agents.len())
                .flat_map(|i| self.agent_obstacles(i))
                .collect();
            (contacts, walls)
        };

        contacts.extend(walls);
        contacts
    }

    /// Forces for each contact, in the same order.
    pub fn forces(&self, contacts: &[Contact]) -> Vec<ContactForce> {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            contacts.par_iter().map(|c| self.force(c)).collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            contacts.iter().map(|c| self.force(c)).collect()
        }
    }

    /// Sum contact forces into one wrench per agent (torques about agent centers).
    pub fn accumulate(&self, forces: &[ContactForce]) -> Vec<Wrench> {
        let mut wrenches = vec![Wrench::zero(); self.agents.len()];
        for f in forces {
            let on_b = f.on_b();
            let point = &f.contact.point;
            match f.contact.pair {
                ContactPair::AgentAgent { a, b } => {
                    let ca = &self.agents[a.agent].kinematics().position;
                    let cb = &self.agents[b.agent].kinematics().position;
                    wrenches[a.agent] += Wrench::at_point(-on_b, point, ca);
                    wrenches[b.agent] += Wrench::at_point(on_b, point, cb);
                }
                ContactPair::AgentObstacle { agent, .. } => {
                    let c = &self.agents[agent.agent].kinematics().position;
                    wrenches[agent.agent] += Wrench::at_point(on_b, point, c);
                }
            }
        }
        wrenches
    }

    /// Detect, evaluate and accumulate in one go.
    pub fn resolve(&self) -> Resolution {
        let contacts = self.detect();
        let forces = self.forces(&contacts);
        let wrenches = self.accumulate(&forces);
        Resolution { forces, wrenches }
    }

    fn force(&self, c: &Contact) -> ContactForce {
        if c.degenerate {
            return ContactForce {
                contact: *c,
                normal_magnitude: 0.0,
                normal_force: Vector2::zeros(),
                tangential_force: Vector2::zeros(),
            };
        }
        let fn_mag = normal_force(&c.law, c.depth, c.approach_velocity);
        let ft = self
            .friction
            .tangential_force(c.law.friction, fn_mag, &c.tangential_velocity);
        ContactForce {
            contact: *c,
            normal_magnitude: fn_mag,
            normal_force: c.normal * fn_mag,
            tangential_force: ft,
        }
    }

    /// Contacts between every disk of agent `i` and every disk of agent `j` (`i < j`).
    fn agent_pair(&self, i: usize, j: usize) -> Vec<Contact> {
        let (ai, aj) = (&self.agents[i], &self.agents[j]);
        let law = ContactLaw::mix(ai.material(), aj.material());
        let mut out = Vec::new();
        for (di, (disk_i, ci)) in ai.body().disks().iter().zip(&self.centers[i]).enumerate() {
            for (dj, (disk_j, cj)) in aj.body().disks().iter().zip(&self.centers[j]).enumerate() {
                let o = disk_disk(ci, disk_i.radius, cj, disk_j.radius);
                if o.depth <= 0.0 {
                    continue;
                }
                let u = aj.kinematics().point_velocity(&o.point)
                    - ai.kinematics().point_velocity(&o.point);
                let un = u.dot(&o.normal);
                out.push(Contact {
                    pair: ContactPair::AgentAgent {
                        a: DiskRef { agent: i, disk: di },
                        b: DiskRef { agent: j, disk: dj },
                    },
                    depth: o.depth,
                    normal: o.normal,
                    point: o.point,
                    approach_velocity: -un,
                    tangential_velocity: u - o.normal * un,
                    law,
                    degenerate: o.degenerate,
                });
            }
        }
        out
    }

    /// Contacts between agent `i`'s disks and every obstacle segment.
    fn agent_obstacles(&self, i: usize) -> Vec<Contact> {
        let agent = &self.agents[i];
        let center = agent.kinematics().position;
        let reach = agent.bounding_radius();
        let mut out = Vec::new();
        for (oi, obstacle) in self.obstacles.iter().enumerate() {
            let law = ContactLaw::mix(agent.material(), obstacle.material());
            let closed = obstacle.is_closed();
            for (si, seg) in obstacle.segments().iter().enumerate() {
                if seg.distance_to(&center) > reach {
                    continue;
                }
                for (di, (disk, c)) in agent.body().disks().iter().zip(&self.centers[i]).enumerate()
                {
                    let prox = disk_segment(c, disk.radius, seg);
                    if prox.depth <= 0.0 {
                        continue;
                    }
                    // A shared vertex belongs to the segment that ends there.
                    if prox.param == 0.0 && (si > 0 || closed) {
                        continue;
                    }
                    let u = agent.kinematics().point_velocity(&prox.point);
                    let un = u.dot(&prox.normal);
                    out.push(Contact {
                        pair: ContactPair::AgentObstacle {
                            agent: DiskRef { agent: i, disk: di },
                            obstacle: oi,
                            segment: si,
                        },
                        depth: prox.depth,
                        normal: prox.normal,
                        point: prox.point,
                        approach_velocity: -un,
                        tangential_velocity: u - prox.normal * un,
                        law,
                        degenerate: false,
                    });
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::{Body, Drive, Kinematics};
    use crate::core::geometry::Disk;
    use crate::core::material::Material;
    use approx::assert_relative_eq;

    fn disk_agent(id: u32, x: f64, y: f64, vx: f64, material: Material) -> Result<Agent> {
        Agent::new(
            id,
            Body::disk(0.25)?,
            80.0,
            None,
            Kinematics::at(Point2::new(x, y)).moving(Vector2::new(vx, 0.0)),
            Drive::default(),
            material,
        )
    }

    fn resolver<'a>(agents: &'a [Agent], obstacles: &'a [Obstacle]) -> ContactResolver<'a> {
        ContactResolver::new(
            agents,
            obstacles,
            FrictionModel::default(),
            BroadPhase::default(),
        )
    }

    #[test]
    fn separated_agents_produce_no_contacts() -> Result<()> {
        let agents = vec![
            disk_agent(0, 0.0, 0.0, 0.0, Material::default())?,
            disk_agent(1, 0.6, 0.0, 0.0, Material::default())?,
        ];
        assert!(resolver(&agents, &[]).detect().is_empty());
        Ok(())
    }

    #[test]
    fn static_overlap_is_pure_spring() -> Result<()> {
        let m = Material::new(1.0e4, 500.0, 0.4)?;
        let agents = vec![
            disk_agent(0, 0.0, 0.0, 0.0, m)?,
            disk_agent(1, 0.45, 0.0, 0.0, m)?,
        ];
        let res = resolver(&agents, &[]).resolve();
        assert_eq!(res.forces.len(), 1);
        let f = &res.forces[0];
        assert_relative_eq!(f.contact.depth, 0.05, epsilon = 1e-12);
        assert_relative_eq!(f.normal_magnitude, 500.0, epsilon = 1e-9);
        assert_eq!(f.tangential_force, Vector2::zeros());
        assert_relative_eq!(res.wrenches[1].force, Vector2::new(500.0, 0.0), epsilon = 1e-9);
        assert_eq!(res.wrenches[0].force, -res.wrenches[1].force);
        assert_relative_eq!(res.wrenches[0].torque, 0.0);
        Ok(())
    }

    #[test]
    fn damping_adds_while_approaching_and_never_pulls() -> Result<()> {
        let m = Material::new(1.0e4, 1.0e3, 0.0)?;
        let closing = vec![
            disk_agent(0, 0.0, 0.0, 1.0, m)?,
            disk_agent(1, 0.49, 0.0, -1.0, m)?,
        ];
        let f = resolver(&closing, &[]).resolve().forces[0];
        assert_relative_eq!(f.contact.approach_velocity, 2.0, epsilon = 1e-12);
        assert_relative_eq!(f.normal_magnitude, 1.0e4 * 0.01 + 2.0e3, epsilon = 1e-9);

        // Separating fast enough that k·δ + c·v_n < 0: clamped to zero.
        let opening = vec![
            disk_agent(0, 0.0, 0.0, -1.0, m)?,
            disk_agent(1, 0.49, 0.0, 1.0, m)?,
        ];
        let f = resolver(&opening, &[]).resolve().forces[0];
        assert_eq!(f.normal_magnitude, 0.0);
        assert_eq!(f.on_b(), Vector2::zeros());
        Ok(())
    }

    #[test]
    fn friction_opposes_sliding_and_is_bounded() -> Result<()> {
        let m = Material::new(1.0e4, 0.0, 0.5)?;
        // B slides along +y relative to A while overlapping by 0.05.
        let a = disk_agent(0, 0.0, 0.0, 0.0, m)?;
        let b = Agent::new(
            1,
            Body::disk(0.25)?,
            80.0,
            None,
            Kinematics::at(Point2::new(0.45, 0.0)).moving(Vector2::new(0.0, 2.0)),
            Drive::default(),
            m,
        )?;
        let agents = vec![a, b];
        let f = resolver(&agents, &[]).resolve().forces[0];
        assert!(f.tangential_force.y < 0.0);
        assert_relative_eq!(f.tangential_force.x, 0.0, epsilon = 1e-12);
        assert!(f.tangential_force.norm() <= 0.5 * f.normal_magnitude + 1e-9);
        // tanh(2 / 0.01) saturates.
        assert_relative_eq!(f.tangential_force.norm(), 0.5 * 500.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn coulomb_dead_band() {
        let model = FrictionModel::Coulomb {
            stick_velocity: 0.05,
        };
        assert_eq!(
            model.tangential_force(0.5, 100.0, &Vector2::new(0.01, 0.0)),
            Vector2::zeros()
        );
        let f = model.tangential_force(0.5, 100.0, &Vector2::new(0.0, -1.0));
        assert_relative_eq!(f, Vector2::new(0.0, 50.0), epsilon = 1e-12);
    }

    #[test]
    fn regularized_friction_vanishes_at_zero_slip() {
        let model = FrictionModel::default();
        assert_eq!(
            model.tangential_force(0.8, 100.0, &Vector2::zeros()),
            Vector2::zeros()
        );
        let small = model.tangential_force(0.8, 100.0, &Vector2::new(1e-4, 0.0));
        assert!(small.norm() < 0.8 * 100.0 * 0.011);
        assert!(small.x < 0.0);
    }

    #[test]
    fn off_center_contact_produces_torque() -> Result<()> {
        let m = Material::new(1.0e4, 0.0, 0.0)?;
        // Shoulder disk at local +y hits a wall on the right.
        let body = Body::new(vec![
            Disk::new(Vector2::zeros(), 0.15)?,
            Disk::new(Vector2::new(0.0, 0.2), 0.1)?,
        ])?;
        let agent = Agent::new(
            0,
            body,
            70.0,
            None,
            Kinematics::at(Point2::new(0.0, 0.0)),
            Drive::default(),
            m,
        )?;
        let wall = Obstacle::wall(0, Point2::new(0.05, -1.0), Point2::new(0.05, 1.0), m)?;
        let agents = vec![agent];
        let obstacles = vec![wall];
        let res = resolver(&agents, &obstacles).resolve();
        // Both disks touch the wall (0.15 > 0.05 and 0.1 > 0.05).
        assert_eq!(res.forces.len(), 2);
        let w = res.wrenches[0];
        assert!(w.force.x < 0.0);
        // Push toward -x applied above the center turns the agent counter-clockwise.
        assert!(w.torque > 0.0);
        Ok(())
    }

    #[test]
    fn polyline_corner_counted_once() -> Result<()> {
        let m = Material::new(1.0e4, 0.0, 0.0)?;
        let corner = Obstacle::new(
            0,
            vec![
                Point2::new(-1.0, 0.0),
                Point2::new(0.0, 0.0),
                Point2::new(0.0, -1.0),
            ],
            m,
        )?;
        // Disk diagonally outside the convex corner, overlapping only the vertex.
        let agents = vec![disk_agent(0, 0.1, 0.1, 0.0, m)?];
        let obstacles = vec![corner];
        let res = resolver(&agents, &obstacles).resolve();
        assert_eq!(res.forces.len(), 1);
        let n = res.forces[0].contact.normal;
        assert_relative_eq!(n, Vector2::new(1.0, 1.0).normalize(), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn same_agent_disks_never_collide() -> Result<()> {
        let body = Body::new(vec![
            Disk::new(Vector2::new(0.0, 0.1), 0.2)?,
            Disk::new(Vector2::new(0.0, -0.1), 0.2)?,
        ])?;
        let agents = vec![Agent::new(
            0,
            body,
            70.0,
            None,
            Kinematics::default(),
            Drive::default(),
            Material::default(),
        )?];
        assert!(resolver(&agents, &[]).detect().is_empty());
        Ok(())
    }

    #[test]
    fn coincident_agents_get_no_force() -> Result<()> {
        let agents = vec![
            disk_agent(0, 1.0, 1.0, 0.0, Material::default())?,
            disk_agent(1, 1.0, 1.0, 0.0, Material::default())?,
        ];
        let res = resolver(&agents, &[]).resolve();
        assert_eq!(res.forces.len(), 1);
        assert!(res.forces[0].contact.degenerate);
        assert_eq!(res.wrenches[0], Wrench::zero());
        assert_eq!(res.wrenches[1], Wrench::zero());
        Ok(())
    }
}
