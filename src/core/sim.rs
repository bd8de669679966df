use crate::config::{Scenario, SimulationConfig, StabilityLimits};
use crate::core::agent::{Agent, Kinematics, Wrench};
use crate::core::contact::{Contact, ContactPair, ContactResolver, Resolution};
use crate::core::event::{Action, ScheduledAction};
use crate::core::frame::{AgentState, Frame, Interaction};
use crate::core::integrator::{advance, stability_bound};
use crate::core::locomotion::driving_wrench;
use crate::core::obstacle::Obstacle;
use crate::error::{Error, Result};
use crate::output::FrameSink;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Slack when comparing action due times against the clock.
const EPS_TIME: f64 = 1e-9;

/// Lifecycle of a [`Simulation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Constructed, no step taken yet.
    Initialized,
    /// At least one step taken, stop condition not met.
    Running,
    /// Stop condition met; further steps are refused.
    Completed,
    /// A step hit a numerical guard; the last valid state is kept.
    Failed,
}

impl Phase {
    /// `Completed` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

/// Fixed-step crowd simulation over a fixed set of agents and static obstacles.
///
/// Each [`step`](Self::step) runs, in order: due scheduled actions on a copy
/// of the arena, contact resolution, driving forces, integration, validation
/// of the integrated configuration (overlap depth included), and finally a
/// swap of the whole arena. A failed step leaves agents and pending actions
/// exactly as they were.
#[derive(Debug)]
pub struct Simulation {
    config: SimulationConfig,
    agents: Vec<Agent>,
    obstacles: Vec<Obstacle>,
    index: HashMap<u32, usize>,
    time_now: f64,
    step_count: u64,
    phase: Phase,
    pending: BinaryHeap<Reverse<ScheduledAction>>,
    next_seq: u64,
    contact_wrenches: Vec<Wrench>,
    interactions: Vec<Interaction>,
}

impl Simulation {
    /// Create a simulation at `t = 0` from validated agents and obstacles.
    ///
    /// Errors:
    /// - `Error::InvalidConfiguration` if the configuration is invalid, the
    ///   population is empty, or agent or obstacle ids repeat.
    ///
    /// Warns (without failing) when the timestep exceeds the contact
    /// stability bound or the smallest relaxation time.
    pub fn new(
        config: SimulationConfig,
        agents: Vec<Agent>,
        obstacles: Vec<Obstacle>,
    ) -> Result<Self> {
        config.validate()?;
        if agents.is_empty() {
            return Err(Error::config("simulation needs at least one agent"));
        }
        let mut index = HashMap::with_capacity(agents.len());
        for (i, a) in agents.iter().enumerate() {
            if index.insert(a.id(), i).is_some() {
                return Err(Error::config(format!("duplicate agent id {}", a.id())));
            }
        }
        let mut seen = HashSet::with_capacity(obstacles.len());
        for o in &obstacles {
            if !seen.insert(o.id()) {
                return Err(Error::config(format!("duplicate obstacle id {}", o.id())));
            }
        }

        check_timestep(&config, &agents, &obstacles);
        tracing::info!(
            agents = agents.len(),
            obstacles = obstacles.len(),
            timestep = config.timestep,
            "simulation initialized"
        );

        let n = agents.len();
        Ok(Self {
            config,
            agents,
            obstacles,
            index,
            time_now: 0.0,
            step_count: 0,
            phase: Phase::Initialized,
            pending: BinaryHeap::new(),
            next_seq: 0,
            contact_wrenches: vec![Wrench::zero(); n],
            interactions: Vec::new(),
        })
    }

    /// Build agents, obstacles and schedule from a scenario description.
    pub fn from_scenario(scenario: &Scenario) -> Result<Self> {
        let built = scenario.build()?;
        let mut sim = Self::new(scenario.simulation.clone(), built.agents, built.obstacles)?;
        for action in built.schedule {
            sim.schedule(action)?;
        }
        Ok(sim)
    }

    /// Queue an action to apply between steps once its due time is reached.
    ///
    /// Actions due at or before the current time are applied at the start of
    /// the next step. Actions due at the same time apply in scheduling order.
    pub fn schedule(&mut self, mut action: ScheduledAction) -> Result<()> {
        if self.phase.is_terminal() {
            return Err(Error::InvalidState(format!(
                "cannot schedule actions once the simulation is {:?}",
                self.phase
            )));
        }
        if !self.index.contains_key(&action.agent) {
            return Err(Error::config(format!(
                "scheduled action targets unknown agent {}",
                action.agent
            )));
        }
        validate_action(&action.action).map_err(|e| e.within(format!("agent {}", action.agent)))?;
        action.seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Reverse(action));
        Ok(())
    }

    /// Advance by one timestep and return the post-step frame.
    ///
    /// Errors:
    /// - `Error::InvalidState` once the simulation is completed or failed.
    /// - `Error::NumericalInstability` if any agent's force, velocity or
    ///   penetration leaves the admissible range; the state is left as it was
    ///   before the step and the simulation moves to [`Phase::Failed`].
    pub fn step(&mut self) -> Result<Frame> {
        match self.phase {
            Phase::Completed => {
                return Err(Error::InvalidState(format!(
                    "simulation completed at t = {} after {} steps",
                    self.time_now, self.step_count
                )))
            }
            Phase::Failed => {
                return Err(Error::InvalidState(format!(
                    "simulation failed during step {}; no further steps allowed",
                    self.step_count + 1
                )))
            }
            Phase::Initialized | Phase::Running => {}
        }

        let due = self.take_due_actions();
        let staged = self.stage_actions(&due).and_then(|agents| {
            self.integrate(agents)
                .map_err(|(agent, detail)| self.instability(agent, detail))
        });
        let staged = match staged {
            Ok(staged) => staged,
            Err(err) => {
                self.pending.extend(due.into_iter().map(Reverse));
                if let Error::NumericalInstability { .. } = err {
                    self.phase = Phase::Failed;
                }
                return Err(err);
            }
        };

        let dt = self.config.timestep;
        let tol = self.config.goal_tolerance;
        self.agents = staged.agents;
        self.step_count += 1;
        self.time_now = self.step_count as f64 * dt;
        for action in &due {
            tracing::debug!(
                agent = action.agent,
                due = action.time_f64(),
                step = self.step_count,
                action = ?action.action,
                "applied scheduled action"
            );
        }
        tracing::debug!(
            step = self.step_count,
            time = self.time_now,
            contacts = staged.resolution.forces.len(),
            "step committed"
        );
        self.contact_wrenches = staged.resolution.wrenches;
        self.interactions = staged.interactions;
        self.phase = Phase::Running;

        let all_arrived = self.agents.iter().all(|a| a.has_arrived(tol));
        if self
            .config
            .stop
            .is_met(self.time_now, self.step_count, all_arrived, dt)
        {
            self.phase = Phase::Completed;
            tracing::info!(
                steps = self.step_count,
                time = self.time_now,
                all_arrived,
                "simulation completed"
            );
        }
        Ok(self.snapshot())
    }

    /// Step until the stop condition is met; returns the final frame.
    pub fn run(&mut self) -> Result<Frame> {
        loop {
            let frame = self.step()?;
            if self.phase == Phase::Completed {
                return Ok(frame);
            }
        }
    }

    /// Like [`run`](Self::run), handing every frame to `sink`.
    pub fn run_with<S: FrameSink + ?Sized>(&mut self, sink: &mut S) -> Result<Frame> {
        loop {
            let frame = self.step()?;
            sink.write_frame(&frame)?;
            if self.phase == Phase::Completed {
                sink.finish()?;
                return Ok(frame);
            }
        }
    }

    /// Current state as a frame (step 0 before the first step).
    pub fn snapshot(&self) -> Frame {
        let tol = self.config.goal_tolerance;
        Frame {
            step: self.step_count,
            time: self.time_now,
            agents: self
                .agents
                .iter()
                .zip(&self.contact_wrenches)
                .map(|(a, w)| AgentState::capture(a, w, tol))
                .collect(),
            interactions: self.interactions.clone(),
        }
    }

    /// Returns current simulation time.
    pub fn time(&self) -> f64 {
        self.time_now
    }

    /// Number of committed steps.
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run parameters.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Agents, in arena order.
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Agent with `id`, if present.
    pub fn agent(&self, id: u32) -> Option<&Agent> {
        self.index.get(&id).map(|&i| &self.agents[i])
    }

    /// Obstacles, in arena order.
    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    /// Number of actions not applied yet.
    pub fn pending_actions(&self) -> usize {
        self.pending.len()
    }

    /// Returns the total kinetic energy (translational and rotational).
    pub fn kinetic_energy(&self) -> f64 {
        self.agents.iter().map(Agent::kinetic_energy).sum()
    }

    /// Pop every action due by now, in application order.
    fn take_due_actions(&mut self) -> Vec<ScheduledAction> {
        let now = self.time_now + EPS_TIME;
        let mut due = Vec::new();
        while self
            .pending
            .peek()
            .is_some_and(|Reverse(next)| next.time_f64() <= now)
        {
            if let Some(Reverse(action)) = self.pending.pop() {
                due.push(action);
            }
        }
        due
    }

    /// Copy of the arena with `due` applied; `self` is left untouched.
    fn stage_actions(&self, due: &[ScheduledAction]) -> Result<Vec<Agent>> {
        let mut agents = self.agents.clone();
        for action in due {
            let i = *self.index.get(&action.agent).ok_or_else(|| {
                Error::InvalidState(format!("scheduled agent {} disappeared", action.agent))
            })?;
            let agent = &mut agents[i];
            match action.action {
                Action::SetGoal { goal } => agent.set_goal(goal)?,
                Action::SetDesiredSpeed { speed } => agent.set_desired_speed(speed)?,
                Action::SetPrescribedWrench { wrench } => agent.set_prescribed(wrench)?,
            }
        }
        Ok(agents)
    }

    /// Resolve contacts on `agents`, integrate, and return the next arena
    /// once every guard holds for both the current and the next configuration.
    fn integrate(&self, mut agents: Vec<Agent>) -> std::result::Result<Staged, Rejection> {
        let cfg = &self.config;
        let resolution =
            ContactResolver::new(&agents, &self.obstacles, cfg.friction, cfg.broad_phase)
                .resolve();
        if let Some(limit) = cfg.limits.max_penetration {
            let deepest = resolution.deepest().filter(|c| c.depth > limit);
            if let Some(c) = deepest {
                return Err(describe_penetration(&agents, &self.obstacles, c, limit));
            }
        }

        let tol = cfg.goal_tolerance;
        let driving = per_agent(&agents, |_, a| driving_wrench(a, tol));
        let wrenches = &resolution.wrenches;
        let next: Vec<Kinematics> = per_agent(&agents, |i, a| {
            advance(a, &(wrenches[i] + driving[i]), cfg.timestep, cfg.integrator)
        });
        if let Some(rejection) = check_limits(&cfg.limits, &agents, &driving, wrenches, &next) {
            return Err(rejection);
        }

        let interactions = if cfg.record_interactions {
            resolution
                .forces
                .iter()
                .map(|f| Interaction::from_force(f, &agents, &self.obstacles))
                .collect()
        } else {
            Vec::new()
        };

        for (agent, k) in agents.iter_mut().zip(next) {
            agent.kinematics = k;
        }
        if let Some(limit) = cfg.limits.max_penetration {
            let after =
                ContactResolver::new(&agents, &self.obstacles, cfg.friction, cfg.broad_phase)
                    .detect();
            let deepest = after
                .iter()
                .max_by(|a, b| a.depth.total_cmp(&b.depth))
                .filter(|c| c.depth > limit);
            if let Some(c) = deepest {
                return Err(describe_penetration(&agents, &self.obstacles, c, limit));
            }
        }

        Ok(Staged {
            agents,
            resolution,
            interactions,
        })
    }

    fn instability(&self, agent: u32, detail: String) -> Error {
        let step = self.step_count + 1;
        tracing::error!(step, time = self.time_now, agent, %detail, "numerical instability");
        Error::NumericalInstability {
            step,
            time: self.time_now,
            agent,
            detail,
        }
    }
}

/// Next arena of a step that passed every guard.
struct Staged {
    agents: Vec<Agent>,
    resolution: Resolution,
    interactions: Vec<Interaction>,
}

/// Offending agent id and what went wrong.
type Rejection = (u32, String);

fn describe_penetration(
    agents: &[Agent],
    obstacles: &[Obstacle],
    c: &Contact,
    limit: f64,
) -> Rejection {
    match c.pair {
        ContactPair::AgentAgent { a, b } => (
            agents[a.agent].id(),
            format!(
                "penetration {:.4} m against agent {} exceeds limit {limit}",
                c.depth,
                agents[b.agent].id()
            ),
        ),
        ContactPair::AgentObstacle {
            agent, obstacle, ..
        } => (
            agents[agent.agent].id(),
            format!(
                "penetration {:.4} m against obstacle {} exceeds limit {limit}",
                c.depth,
                obstacles[obstacle].id()
            ),
        ),
    }
}

fn check_limits(
    limits: &StabilityLimits,
    agents: &[Agent],
    driving: &[Wrench],
    contact: &[Wrench],
    next: &[Kinematics],
) -> Option<Rejection> {
    for (i, agent) in agents.iter().enumerate() {
        let id = agent.id();
        if !contact[i].is_finite() {
            return Some((id, "non-finite contact force".into()));
        }
        if !driving[i].is_finite() {
            return Some((id, "non-finite driving force".into()));
        }
        let k = &next[i];
        if !k.is_finite() {
            return Some((id, "non-finite kinematic state".into()));
        }
        let speed = k.velocity.norm();
        if speed > limits.max_speed {
            return Some((
                id,
                format!("speed {speed:.3} m/s exceeds limit {}", limits.max_speed),
            ));
        }
        let spin = k.angular_velocity.abs();
        if spin > limits.max_angular_speed {
            return Some((
                id,
                format!(
                    "angular speed {spin:.3} rad/s exceeds limit {}",
                    limits.max_angular_speed
                ),
            ));
        }
    }
    None
}

fn validate_action(action: &Action) -> Result<()> {
    match *action {
        Action::SetGoal { goal } => goal.validated().map(|_| ()),
        Action::SetDesiredSpeed { speed } => {
            if !speed.is_finite() || speed < 0.0 {
                return Err(Error::config(format!(
                    "desired speed must be finite and >= 0, got {speed}"
                )));
            }
            Ok(())
        }
        Action::SetPrescribedWrench { wrench } => {
            if !wrench.is_finite() {
                return Err(Error::config("prescribed force and torque must be finite"));
            }
            Ok(())
        }
    }
}

fn check_timestep(config: &SimulationConfig, agents: &[Agent], obstacles: &[Obstacle]) {
    let dt = config.timestep;
    let min_mass = agents.iter().map(Agent::mass).fold(f64::INFINITY, f64::min);
    let max_stiffness = agents
        .iter()
        .map(|a| a.material().stiffness)
        .chain(obstacles.iter().map(|o| o.material().stiffness))
        .fold(0.0, f64::max);
    if max_stiffness > 0.0 {
        let bound = stability_bound(min_mass, max_stiffness);
        if dt > bound {
            tracing::warn!(
                timestep = dt,
                bound,
                "timestep exceeds the contact stability bound; stiff contacts may blow up"
            );
        }
    }
    let min_tau = agents
        .iter()
        .map(|a| a.drive().relaxation_time.min(a.drive().rotational_relaxation_time))
        .fold(f64::INFINITY, f64::min);
    if dt >= min_tau {
        tracing::warn!(
            timestep = dt,
            relaxation_time = min_tau,
            "timestep not smaller than the shortest relaxation time"
        );
    }
}

/// Map over agents, in parallel when the `parallel` feature is enabled.
/// Output order always matches arena order.
fn per_agent<T, F>(agents: &[Agent], f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize, &Agent) -> T + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        agents.par_iter().enumerate().map(|(i, a)| f(i, a)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        agents.iter().enumerate().map(|(i, a)| f(i, a)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StabilityLimits, StopCondition};
    use crate::core::agent::{Body, Drive, Goal};
    use crate::core::material::Material;
    use crate::output::TrajectoryBuffer;
    use approx::assert_relative_eq;
    use nalgebra::{Point2, Vector2};

    fn walker(id: u32, x: f64, goal: Goal) -> Result<Agent> {
        Agent::new(
            id,
            Body::disk(0.25)?,
            80.0,
            None,
            Kinematics::at(Point2::new(x, 0.0)),
            Drive::toward(goal),
            Material::default(),
        )
    }

    fn config(steps: u64) -> SimulationConfig {
        SimulationConfig::default()
            .with_timestep(0.01)
            .with_stop(StopCondition::after_steps(steps))
    }

    #[test]
    fn make_small_sim_ok() -> Result<()> {
        let sim = Simulation::new(
            config(10),
            vec![walker(1, 0.0, Goal::None)?, walker(2, 2.0, Goal::None)?],
            vec![],
        )?;
        assert_eq!(sim.phase(), Phase::Initialized);
        assert_eq!(sim.time(), 0.0);
        let f = sim.snapshot();
        assert_eq!(f.step, 0);
        assert_eq!(f.agents.len(), 2);
        assert_eq!(sim.agent(2).map(Agent::id), Some(2));
        Ok(())
    }

    #[test]
    fn duplicate_ids_rejected() -> Result<()> {
        let err = Simulation::new(
            config(10),
            vec![walker(5, 0.0, Goal::None)?, walker(5, 2.0, Goal::None)?],
            vec![],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate agent id 5"));
        Ok(())
    }

    #[test]
    fn empty_population_rejected() {
        assert!(Simulation::new(config(10), vec![], vec![]).is_err());
    }

    #[test]
    fn completes_after_max_steps_then_refuses() -> Result<()> {
        let mut sim = Simulation::new(config(3), vec![walker(1, 0.0, Goal::None)?], vec![])?;
        let last = sim.run()?;
        assert_eq!(last.step, 3);
        assert_eq!(sim.phase(), Phase::Completed);
        assert_relative_eq!(sim.time(), 0.03, epsilon = 1e-12);
        assert!(matches!(sim.step(), Err(Error::InvalidState(_))));
        assert!(matches!(sim.run(), Err(Error::InvalidState(_))));
        Ok(())
    }

    #[test]
    fn run_with_streams_every_frame() -> Result<()> {
        let mut sim = Simulation::new(
            config(5),
            vec![walker(1, 0.0, Goal::Direction(Vector2::new(1.0, 0.0)))?],
            vec![],
        )?;
        let mut buf = TrajectoryBuffer::new();
        sim.run_with(&mut buf)?;
        let steps: Vec<u64> = buf.frames().iter().map(|f| f.step).collect();
        assert_eq!(steps, vec![1, 2, 3, 4, 5]);
        let xs: Vec<f64> = buf.trajectory_of(1).iter().map(|(_, p)| p.x).collect();
        assert!(xs.windows(2).all(|w| w[1] > w[0]));
        Ok(())
    }

    #[test]
    fn scheduled_goal_applies_at_due_time() -> Result<()> {
        let mut sim = Simulation::new(config(20), vec![walker(1, 0.0, Goal::None)?], vec![])?;
        sim.schedule(ScheduledAction::new(
            0.05,
            1,
            Action::SetGoal {
                goal: Goal::Point(Point2::new(10.0, 0.0)),
            },
        )?)?;
        for _ in 0..5 {
            let f = sim.step()?;
            assert_eq!(f.agents[0].velocity, Vector2::zeros());
        }
        assert_eq!(sim.pending_actions(), 1);
        let f = sim.step()?;
        assert_eq!(sim.pending_actions(), 0);
        assert!(f.agents[0].velocity.x > 0.0);
        Ok(())
    }

    #[test]
    fn schedule_rejects_unknown_agent() -> Result<()> {
        let mut sim = Simulation::new(config(2), vec![walker(1, 0.0, Goal::None)?], vec![])?;
        let err = sim
            .schedule(ScheduledAction::new(
                0.0,
                99,
                Action::SetDesiredSpeed { speed: 1.0 },
            )?)
            .unwrap_err();
        assert!(err.to_string().contains("99"));
        let err = sim
            .schedule(ScheduledAction::new(
                0.0,
                1,
                Action::SetDesiredSpeed { speed: -1.0 },
            )?)
            .unwrap_err();
        assert!(err.to_string().contains("agent 1"));
        Ok(())
    }

    #[test]
    fn speed_limit_fails_without_committing() -> Result<()> {
        let cfg = config(10).with_limits(StabilityLimits {
            max_speed: 0.07,
            ..StabilityLimits::default()
        });
        let mut sim = Simulation::new(
            cfg,
            vec![walker(7, 0.0, Goal::Direction(Vector2::new(1.0, 0.0)))?],
            vec![],
        )?;
        let before = sim.snapshot();
        // Speeds after each step: 0.026, 0.051, 0.076 m/s.
        sim.step()?;
        sim.step()?;
        let last_good = sim.snapshot();
        let err = sim.step().unwrap_err();
        match err {
            Error::NumericalInstability { step, agent, .. } => {
                assert_eq!(step, 3);
                assert_eq!(agent, 7);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sim.phase(), Phase::Failed);
        assert_eq!(sim.snapshot(), last_good);
        assert_ne!(before, last_good);
        assert!(matches!(sim.step(), Err(Error::InvalidState(_))));
        Ok(())
    }

    #[test]
    fn kinetic_energy_sums_agents() -> Result<()> {
        let mut a = walker(1, 0.0, Goal::None)?;
        a.kinematics.velocity = Vector2::new(1.0, 0.0);
        let sim = Simulation::new(config(1), vec![a, walker(2, 3.0, Goal::None)?], vec![])?;
        assert_relative_eq!(sim.kinetic_energy(), 40.0, epsilon = 1e-12);
        Ok(())
    }
}
