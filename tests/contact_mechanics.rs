use approx::assert_relative_eq;
use crowdmech::config::{SimulationConfig, StabilityLimits, StopCondition};
use crowdmech::core::contact::normal_force;
use crowdmech::core::geometry::disk_disk;
use crowdmech::core::{
    Agent, Body, BroadPhase, ContactLaw, ContactResolver, Counterpart, Disk, Drive, FrictionModel,
    Goal, Kinematics, Material, Obstacle, Simulation,
};
use crowdmech::error::Result;
use nalgebra::{Point2, Vector2};
use proptest::prelude::*;

fn disk_agent(id: u32, r: f64, at: Point2<f64>, v: Vector2<f64>, drive: Drive) -> Result<Agent> {
    Agent::new(
        id,
        Body::disk(r)?,
        80.0,
        None,
        Kinematics::at(at).moving(v),
        drive,
        Material::default(),
    )
}

proptest! {
    /// Overlap depth is the same from either side and the normals are opposite.
    #[test]
    fn overlap_is_symmetric(
        ax in -2.0..2.0f64, ay in -2.0..2.0f64,
        bx in -2.0..2.0f64, by in -2.0..2.0f64,
        ra in 0.05..0.5f64, rb in 0.05..0.5f64,
    ) {
        let a = Point2::new(ax, ay);
        let b = Point2::new(bx, by);
        prop_assume!((b - a).norm() > 1e-9);
        let ab = disk_disk(&a, ra, &b, rb);
        let ba = disk_disk(&b, rb, &a, ra);
        prop_assert_eq!(ab.depth, ba.depth);
        prop_assert_eq!(ab.normal, -ba.normal);
    }

    /// Contact forces between two agents are equal and opposite whatever the
    /// arena order, and the normal force never pulls.
    #[test]
    fn pair_forces_are_reciprocal(
        dx in 0.05..0.6f64, dy in -0.3..0.3f64,
        vax in -2.0..2.0f64, vay in -2.0..2.0f64,
        vbx in -2.0..2.0f64, vby in -2.0..2.0f64,
    ) {
        let a = disk_agent(1, 0.25, Point2::origin(), Vector2::new(vax, vay), Drive::default()).unwrap();
        let b = disk_agent(2, 0.3, Point2::new(dx, dy), Vector2::new(vbx, vby), Drive::default()).unwrap();

        let forward = [a.clone(), b.clone()];
        let res = ContactResolver::new(&forward, &[], FrictionModel::default(), BroadPhase::AllPairs).resolve();
        prop_assert_eq!(res.wrenches[0].force, -res.wrenches[1].force);
        for f in &res.forces {
            prop_assert!(f.normal_magnitude >= 0.0);
            // Normal force on B points from A to B.
            prop_assert!(f.normal_force.dot(&f.contact.normal) >= 0.0);
        }

        let backward = [b, a];
        let rev = ContactResolver::new(&backward, &[], FrictionModel::default(), BroadPhase::AllPairs).resolve();
        prop_assert_eq!(res.forces.len(), rev.forces.len());
        assert_relative_eq!(res.wrenches[0].force, rev.wrenches[1].force, epsilon = 1e-9);
        assert_relative_eq!(res.wrenches[1].force, rev.wrenches[0].force, epsilon = 1e-9);
    }

    /// Separating fast enough clamps the normal force to zero instead of pulling.
    #[test]
    fn normal_force_is_never_adhesive(depth in -0.1..0.1f64, approach in -50.0..50.0f64) {
        let law = ContactLaw::from(Material::default());
        let f = normal_force(&law, depth, approach);
        prop_assert!(f >= 0.0);
        if depth <= 0.0 {
            prop_assert_eq!(f, 0.0);
        }
    }
}

/// Two agents walking head-on from a 0.4 m surface gap push against each
/// other without passing through, and settle into a small symmetric overlap.
#[test]
fn head_on_pair_does_not_pass_through() -> Result<()> {
    let material = Material::new(1.0e5, 1.0e3, 0.0)?;
    let walker = |id: u32, x: f64, goal_x: f64| -> Result<Agent> {
        Agent::new(
            id,
            Body::disk(0.25)?,
            80.0,
            None,
            Kinematics::at(Point2::new(x, 0.0)),
            Drive::toward(Goal::Point(Point2::new(goal_x, 0.0))),
            material,
        )
    };
    let cfg = SimulationConfig::default()
        .with_timestep(1.0e-3)
        .with_stop(StopCondition::at_time(4.0))
        .with_friction(FrictionModel::Coulomb {
            stick_velocity: 0.0,
        })
        .with_limits(StabilityLimits {
            max_penetration: Some(0.05),
            ..StabilityLimits::default()
        });
    let mut sim = Simulation::new(
        cfg,
        vec![walker(1, -0.45, 10.0)?, walker(2, 0.45, -10.0)?],
        vec![],
    )?;

    loop {
        let f = sim.step()?;
        let (a, b) = (&f.agents[0], &f.agents[1]);
        assert!(a.position.x < b.position.x, "agents crossed at t = {}", f.time);
        assert_eq!(a.contact_force, -b.contact_force);
        if sim.phase().is_terminal() {
            break;
        }
    }

    let f = sim.snapshot();
    let (a, b) = (&f.agents[0], &f.agents[1]);
    assert_relative_eq!(a.position.x, -b.position.x, epsilon = 1e-9);
    assert_relative_eq!(a.position.y, 0.0, epsilon = 1e-12);
    // Steady state: spring balances the stalled driving force m v_d / τ.
    let expected_depth = 80.0 * 1.3 / 0.5 / 1.0e5;
    let depth = 0.5 - (b.position.x - a.position.x);
    assert_relative_eq!(depth, expected_depth, epsilon = 5.0e-4);
    assert!(a.velocity.norm() < 0.01);
    Ok(())
}

/// An agent walking into a wall is held back by it.
#[test]
fn wall_stops_walker() -> Result<()> {
    let wall = Obstacle::wall(
        9,
        Point2::new(2.0, -5.0),
        Point2::new(2.0, 5.0),
        Material::default(),
    )?;
    let agent = disk_agent(
        1,
        0.25,
        Point2::new(0.0, 0.0),
        Vector2::zeros(),
        Drive::toward(Goal::Direction(Vector2::new(1.0, 0.0))),
    )?;
    let cfg = SimulationConfig::default()
        .with_timestep(1.0e-3)
        .with_stop(StopCondition::at_time(6.0))
        .recording_interactions();
    let mut sim = Simulation::new(cfg, vec![agent], vec![wall])?;
    let last = sim.run()?;

    let a = &last.agents[0];
    assert!(a.position.x + 0.25 > 2.0, "agent should press into the wall");
    assert!(a.position.x + 0.25 < 2.01);
    assert!(a.contact_force.x < 0.0);
    assert!(a.velocity.norm() < 0.01);
    assert_eq!(last.interactions.len(), 1);
    assert_eq!(
        last.interactions[0].counterpart,
        Counterpart::Obstacle(9)
    );
    Ok(())
}

/// A push on the shoulder of a multi-disk body makes it spin.
#[test]
fn off_center_contact_produces_torque() -> Result<()> {
    let body = Body::new(vec![
        Disk::new(Vector2::new(0.0, 0.2), 0.1)?,
        Disk::new(Vector2::new(0.0, -0.2), 0.1)?,
    ])?;
    let target = Agent::new(
        1,
        body,
        70.0,
        None,
        Kinematics::default(),
        Drive::default(),
        Material::default(),
    )?;
    // Hits the upper disk from the -x side.
    let bullet = disk_agent(
        2,
        0.1,
        Point2::new(-0.15, 0.2),
        Vector2::zeros(),
        Drive::default(),
    )?;
    let agents = [target, bullet];
    let res =
        ContactResolver::new(&agents, &[], FrictionModel::default(), BroadPhase::AllPairs).resolve();
    assert_eq!(res.forces.len(), 1);
    // Pushed toward +x at y = +0.2: clockwise.
    assert!(res.wrenches[0].force.x > 0.0);
    assert!(res.wrenches[0].torque < 0.0);
    Ok(())
}
