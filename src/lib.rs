//! Crowd mechanics: pedestrians as rigid unions of disks pushed by their own
//! locomotion and by viscoelastic, frictional contacts with each other and
//! with static walls, advanced with a fixed-step integrator.
//!
//! ```no_run
//! use crowdmech::config::Scenario;
//! use crowdmech::core::Simulation;
//!
//! # fn main() -> crowdmech::Result<()> {
//! let scenario = Scenario::from_path("corridor.json")?;
//! let mut sim = Simulation::from_scenario(&scenario)?;
//! let last = sim.run()?;
//! println!("t = {}, {} agents", last.time, last.agents.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod output;
pub mod population;

#[cfg(feature = "python")]
mod python;

pub use crate::core::{Frame, Phase, Simulation};
pub use crate::error::{Error, Result};

use crate::config::Scenario;
use crate::output::JsonLinesWriter;
use std::path::Path;

/// Load a scenario file, run it to completion and write every frame as JSON
/// lines to `output_path`. Returns the final frame.
pub fn run_scenario(
    scenario_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
) -> Result<Frame> {
    let scenario = Scenario::from_path(scenario_path)?;
    let mut sim = Simulation::from_scenario(&scenario)?;
    let mut writer = JsonLinesWriter::create(output_path)?;
    sim.run_with(&mut writer)
}
