use numpy::ndarray::{Array1, Array2};
use numpy::{IntoPyArray, PyArray1, PyArray2};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::config::Scenario;
use crate::core::agent::{Goal, Wrench};
use crate::core::event::{Action, ScheduledAction};
use crate::core::frame::Counterpart;
use crate::core::{Phase, Simulation};
use crate::error::Error;
use nalgebra::{Point2, Vector2};

fn py_err(e: Error) -> PyErr {
    match e {
        Error::InvalidConfiguration(_) => PyValueError::new_err(e.to_string()),
        _ => PyRuntimeError::new_err(e.to_string()),
    }
}

/// Python-facing wrapper around the Rust crowd simulation.
///
/// API:
/// - __new__(scenario_json) / from_file(path)
/// - step(), advance(steps), run()
/// - get_positions() -> np.ndarray, shape (N, 2); likewise velocities and contact forces
/// - get_orientations() / get_angular_velocities() -> shape (N,)
/// - set_goal / set_direction / set_desired_speed / set_prescribed_force, applied before the next step
#[pyclass]
pub struct CrowdSim {
    sim: Simulation,
}

impl CrowdSim {
    fn schedule_now(&mut self, agent: u32, action: Action) -> PyResult<()> {
        let due = ScheduledAction::new(self.sim.time(), agent, action).map_err(py_err)?;
        self.sim.schedule(due).map_err(py_err)
    }

    fn column_pairs<F>(&self, f: F) -> Array2<f64>
    where
        F: Fn(&crate::core::frame::AgentState) -> Vector2<f64>,
    {
        let frame = self.sim.snapshot();
        let mut arr = Array2::<f64>::zeros((frame.agents.len(), 2));
        for (i, a) in frame.agents.iter().enumerate() {
            let v = f(a);
            arr[[i, 0]] = v.x;
            arr[[i, 1]] = v.y;
        }
        arr
    }
}

#[pymethods]
impl CrowdSim {
    /// Build a simulation from scenario JSON text.
    ///
    /// Errors: raises ValueError on malformed or invalid scenarios.
    #[new]
    fn new(scenario_json: &str) -> PyResult<Self> {
        let scenario = Scenario::from_json_str(scenario_json).map_err(py_err)?;
        let sim = Simulation::from_scenario(&scenario).map_err(py_err)?;
        Ok(Self { sim })
    }

    /// Build a simulation from a scenario file.
    #[staticmethod]
    fn from_file(path: &str) -> PyResult<Self> {
        let scenario = Scenario::from_path(path).map_err(py_err)?;
        let sim = Simulation::from_scenario(&scenario).map_err(py_err)?;
        Ok(Self { sim })
    }

    /// Advance one step (releases the GIL). Returns the new simulation time.
    fn step(&mut self, py: Python<'_>) -> PyResult<f64> {
        let frame = py.detach(|| self.sim.step()).map_err(py_err)?;
        Ok(frame.time)
    }

    /// Advance up to `steps` steps, stopping early on completion. Returns steps taken.
    fn advance(&mut self, py: Python<'_>, steps: u64) -> PyResult<u64> {
        py.detach(|| -> crate::error::Result<u64> {
            let mut taken = 0;
            while taken < steps && !self.sim.phase().is_terminal() {
                self.sim.step()?;
                taken += 1;
            }
            Ok(taken)
        })
        .map_err(py_err)
    }

    /// Run until the stop condition is met (releases the GIL). Returns the final time.
    fn run(&mut self, py: Python<'_>) -> PyResult<f64> {
        let frame = py.detach(|| self.sim.run()).map_err(py_err)?;
        Ok(frame.time)
    }

    /// Current simulation time.
    #[getter]
    fn time(&self) -> f64 {
        self.sim.time()
    }

    /// Number of committed steps.
    #[getter]
    fn step_count(&self) -> u64 {
        self.sim.step_count()
    }

    /// One of "initialized", "running", "completed", "failed".
    #[getter]
    fn phase(&self) -> &'static str {
        match self.sim.phase() {
            Phase::Initialized => "initialized",
            Phase::Running => "running",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }

    /// Total kinetic energy.
    fn kinetic_energy(&self) -> f64 {
        self.sim.kinetic_energy()
    }

    /// Agent ids in row order of every array getter.
    fn get_ids<'py>(&self, py: Python<'py>) -> Py<PyArray1<u32>> {
        let ids: Array1<u32> = self.sim.agents().iter().map(|a| a.id()).collect();
        ids.into_pyarray(py).to_owned().into()
    }

    /// Positions as a NumPy array of shape (N, 2), dtype=float64.
    fn get_positions<'py>(&self, py: Python<'py>) -> Py<PyArray2<f64>> {
        self.column_pairs(|a| a.position.coords)
            .into_pyarray(py)
            .to_owned()
            .into()
    }

    /// Velocities as a NumPy array of shape (N, 2), dtype=float64.
    fn get_velocities<'py>(&self, py: Python<'py>) -> Py<PyArray2<f64>> {
        self.column_pairs(|a| a.velocity)
            .into_pyarray(py)
            .to_owned()
            .into()
    }

    /// Net contact forces of the last step, shape (N, 2).
    fn get_contact_forces<'py>(&self, py: Python<'py>) -> Py<PyArray2<f64>> {
        self.column_pairs(|a| a.contact_force)
            .into_pyarray(py)
            .to_owned()
            .into()
    }

    /// Headings (rad), shape (N,).
    fn get_orientations<'py>(&self, py: Python<'py>) -> Py<PyArray1<f64>> {
        let out: Array1<f64> = self
            .sim
            .agents()
            .iter()
            .map(|a| a.kinematics().orientation)
            .collect();
        out.into_pyarray(py).to_owned().into()
    }

    /// Angular velocities (rad/s), shape (N,).
    fn get_angular_velocities<'py>(&self, py: Python<'py>) -> Py<PyArray1<f64>> {
        let out: Array1<f64> = self
            .sim
            .agents()
            .iter()
            .map(|a| a.kinematics().angular_velocity)
            .collect();
        out.into_pyarray(py).to_owned().into()
    }

    /// Contacts of the last step (requires `record_interactions`).
    ///
    /// Returns: list of dicts with keys agent, disk, other_agent | obstacle,
    /// point, depth, normal_force, tangential_force.
    fn get_interactions<'py>(&self, py: Python<'py>) -> PyResult<Vec<Py<PyDict>>> {
        let frame = self.sim.snapshot();
        let mut out = Vec::with_capacity(frame.interactions.len());
        for it in &frame.interactions {
            let d = PyDict::new(py);
            d.set_item("agent", it.agent)?;
            d.set_item("disk", it.disk)?;
            match it.counterpart {
                Counterpart::Agent(id) => d.set_item("other_agent", id)?,
                Counterpart::Obstacle(id) => d.set_item("obstacle", id)?,
            }
            d.set_item("point", (it.point.x, it.point.y))?;
            d.set_item("depth", it.depth)?;
            d.set_item("normal_force", (it.normal_force.x, it.normal_force.y))?;
            d.set_item(
                "tangential_force",
                (it.tangential_force.x, it.tangential_force.y),
            )?;
            out.push(d.into());
        }
        Ok(out)
    }

    /// Send agent `agent` toward point (x, y) from the next step on.
    fn set_goal(&mut self, agent: u32, x: f64, y: f64) -> PyResult<()> {
        self.schedule_now(
            agent,
            Action::SetGoal {
                goal: Goal::Point(Point2::new(x, y)),
            },
        )
    }

    /// Make agent `agent` walk along (dx, dy) from the next step on.
    fn set_direction(&mut self, agent: u32, dx: f64, dy: f64) -> PyResult<()> {
        self.schedule_now(
            agent,
            Action::SetGoal {
                goal: Goal::Direction(Vector2::new(dx, dy)),
            },
        )
    }

    /// Change the desired speed of `agent`.
    fn set_desired_speed(&mut self, agent: u32, speed: f64) -> PyResult<()> {
        self.schedule_now(agent, Action::SetDesiredSpeed { speed })
    }

    /// Apply a constant external force and torque to `agent` until changed.
    #[pyo3(signature = (agent, fx, fy, torque=0.0))]
    fn set_prescribed_force(&mut self, agent: u32, fx: f64, fy: f64, torque: f64) -> PyResult<()> {
        self.schedule_now(
            agent,
            Action::SetPrescribedWrench {
                wrench: Wrench {
                    force: Vector2::new(fx, fy),
                    torque,
                },
            },
        )
    }
}

/// Run a scenario file to completion, writing JSON-lines frames to
/// `output_path`. Returns 0 on success, otherwise the error's status code.
#[pyfunction]
fn run_scenario(py: Python<'_>, scenario_path: &str, output_path: &str) -> i32 {
    match py.detach(|| crate::run_scenario(scenario_path, output_path)) {
        Ok(_) => 0,
        Err(e) => {
            tracing::error!(error = %e, scenario = scenario_path, "scenario run failed");
            e.status_code()
        }
    }
}

/// The crowdmech Python module entry point.
#[pymodule]
fn crowdmech(_py: Python<'_>, m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<CrowdSim>()?;
    m.add_function(wrap_pyfunction!(run_scenario, m)?)?;
    Ok(())
}
