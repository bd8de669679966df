use approx::assert_relative_eq;
use crowdmech::config::{SimulationConfig, StopCondition};
use crowdmech::core::{Agent, Body, Drive, Goal, Kinematics, Material, Phase, Simulation};
use crowdmech::error::Result;
use nalgebra::{Point2, Vector2};
use std::f64::consts::FRAC_PI_2;

fn lone_walker(goal: Goal, facing: f64) -> Result<Agent> {
    Agent::new(
        1,
        Body::disk(0.25)?,
        80.0,
        None,
        Kinematics::at(Point2::origin()).facing(facing),
        Drive {
            goal,
            desired_speed: 1.3,
            relaxation_time: 0.5,
            rotational_relaxation_time: 0.5,
        },
        Material::default(),
    )
}

/// After three relaxation times the speed gap has shrunk by e^-3 and the
/// agent has only ever moved closer to its goal.
#[test]
fn single_agent_relaxes_to_desired_speed() -> Result<()> {
    let goal = Point2::new(20.0, 0.0);
    let cfg = SimulationConfig::default()
        .with_timestep(0.01)
        .with_stop(StopCondition::after_steps(150));
    let mut sim = Simulation::new(cfg, vec![lone_walker(Goal::Point(goal), 0.0)?], vec![])?;

    let mut dist = (goal - Point2::origin()).norm();
    let mut last = sim.snapshot();
    while !sim.phase().is_terminal() {
        last = sim.step()?;
        let d = (goal - last.agents[0].position).norm();
        assert!(d < dist, "distance to goal grew at step {}", last.step);
        dist = d;
    }
    let speed = last.agents[0].velocity.norm();
    assert!(
        (1.3 - speed).abs() <= 1.3 * (-3.0_f64).exp(),
        "speed {speed} too far from 1.3"
    );
    assert_relative_eq!(last.agents[0].velocity.y, 0.0, epsilon = 1e-12);
    Ok(())
}

/// An agent facing sideways turns toward its walking direction.
#[test]
fn heading_turns_toward_travel_direction() -> Result<()> {
    let cfg = SimulationConfig::default()
        .with_timestep(0.01)
        .with_stop(StopCondition::after_steps(600));
    let mut sim = Simulation::new(
        cfg,
        vec![lone_walker(
            Goal::Direction(Vector2::new(1.0, 0.0)),
            FRAC_PI_2,
        )?],
        vec![],
    )?;
    let last = sim.run()?;
    let a = &last.agents[0];
    assert!(a.orientation.abs() < 0.05, "orientation {}", a.orientation);
    assert_relative_eq!(a.velocity, Vector2::new(1.3, 0.0), epsilon = 1e-3);
    Ok(())
}

/// With an arrival stop condition the run ends once the goal is reached,
/// well before the time limit.
#[test]
fn run_ends_on_arrival() -> Result<()> {
    let cfg = SimulationConfig::default()
        .with_timestep(0.01)
        .with_goal_tolerance(0.2)
        .with_stop(StopCondition {
            max_time: Some(20.0),
            max_steps: None,
            until_all_arrived: true,
        });
    let mut sim = Simulation::new(
        cfg,
        vec![lone_walker(Goal::Point(Point2::new(3.0, 0.0)), 0.0)?],
        vec![],
    )?;
    let last = sim.run()?;
    assert_eq!(sim.phase(), Phase::Completed);
    assert!(last.agents[0].arrived);
    assert!(last.time < 5.0, "took {} s", last.time);
    assert!((Point2::new(3.0, 0.0) - last.agents[0].position).norm() <= 0.2);
    Ok(())
}

/// A prescribed sideways force deflects an agent walking along x.
#[test]
fn prescribed_force_deflects_walker() -> Result<()> {
    use crowdmech::core::{Action, ScheduledAction, Wrench};

    let cfg = SimulationConfig::default()
        .with_timestep(0.01)
        .with_stop(StopCondition::after_steps(100));
    let mut sim = Simulation::new(
        cfg,
        vec![lone_walker(Goal::Direction(Vector2::new(1.0, 0.0)), 0.0)?],
        vec![],
    )?;
    sim.schedule(ScheduledAction::new(
        0.5,
        1,
        Action::SetPrescribedWrench {
            wrench: Wrench {
                force: Vector2::new(0.0, 80.0),
                torque: 0.0,
            },
        },
    )?)?;
    let last = sim.run()?;
    // Lateral speed approaches F τ / m = 0.5 m/s.
    assert!(last.agents[0].velocity.y > 0.25);
    assert!(last.agents[0].velocity.y < 0.5);
    assert!(last.agents[0].position.y > 0.0);
    Ok(())
}
