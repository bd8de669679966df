//! Self-propulsion: relaxation of each agent's velocity toward its desired
//! velocity, and of its heading toward the direction of travel.

use crate::core::agent::{Agent, Goal, Wrench};
use crate::core::geometry::wrap_angle;
use nalgebra::Vector2;

/// Desired velocity of `agent`: `desired_speed` toward its goal, or zero when
/// it has no goal or is within `goal_tolerance` of its goal point.
pub fn desired_velocity(agent: &Agent, goal_tolerance: f64) -> Vector2<f64> {
    let drive = agent.drive();
    match drive.goal {
        Goal::Point(p) => {
            let to_goal = p - agent.kinematics().position;
            let dist = to_goal.norm();
            if dist <= goal_tolerance || dist == 0.0 {
                Vector2::zeros()
            } else {
                to_goal * (drive.desired_speed / dist)
            }
        }
        Goal::Direction(d) => d * drive.desired_speed,
        Goal::None => Vector2::zeros(),
    }
}

/// Driving force and torque for `agent`, plus its prescribed external wrench.
///
/// Force: `m (v_desired - v) / τ`. Torque: `I (ω_target - ω) / τ_rot` where
/// `ω_target = wrap(θ_desired - θ) / τ_rot` while the agent has somewhere to
/// go, and zero otherwise (the torque then only damps residual spin).
pub fn driving_wrench(agent: &Agent, goal_tolerance: f64) -> Wrench {
    let drive = agent.drive();
    let k = agent.kinematics();
    let v_des = desired_velocity(agent, goal_tolerance);

    let force = (v_des - k.velocity) * (agent.mass() / drive.relaxation_time);

    let tau_rot = drive.rotational_relaxation_time;
    let omega_target = if v_des.norm_squared() > 0.0 {
        let heading = v_des.y.atan2(v_des.x);
        wrap_angle(heading - k.orientation) / tau_rot
    } else {
        0.0
    };
    let torque = agent.inertia() * (omega_target - k.angular_velocity) / tau_rot;

    Wrench { force, torque } + *agent.prescribed()
}
