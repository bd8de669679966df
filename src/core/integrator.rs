//! Fixed-step time integration of agent kinematics.
//!
//! The integrator never touches an [`Agent`]: it returns the next
//! [`Kinematics`] so the loop can validate every agent before committing any.

use crate::core::agent::{Agent, Kinematics, Wrench};
use crate::core::geometry::wrap_angle;
use serde::{Deserialize, Serialize};

/// Time-stepping scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationScheme {
    /// Symplectic Euler: velocity first, then position with the new velocity.
    #[default]
    SemiImplicitEuler,
    /// Forward Euler: position with the old velocity.
    ExplicitEuler,
}

/// Next kinematic state of `agent` under net wrench `wrench` over `dt`.
pub fn advance(agent: &Agent, wrench: &Wrench, dt: f64, scheme: IntegrationScheme) -> Kinematics {
    let k = agent.kinematics();
    let velocity = k.velocity + wrench.force * (dt / agent.mass());
    let angular_velocity = k.angular_velocity + wrench.torque * dt / agent.inertia();
    let (v_pos, w_pos) = match scheme {
        IntegrationScheme::SemiImplicitEuler => (velocity, angular_velocity),
        IntegrationScheme::ExplicitEuler => (k.velocity, k.angular_velocity),
    };
    Kinematics {
        position: k.position + v_pos * dt,
        orientation: wrap_angle(k.orientation + w_pos * dt),
        velocity,
        angular_velocity,
    }
}

/// Largest timestep for which the explicit contact spring between two bodies
/// of mass `min_mass` and stiffness `max_stiffness` stays stable
/// (`ω·dt < 2` with `ω = sqrt(2k/m)`).
pub fn stability_bound(min_mass: f64, max_stiffness: f64) -> f64 {
    2.0 * (min_mass / (2.0 * max_stiffness)).sqrt()
}
