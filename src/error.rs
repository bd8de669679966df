use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for the mechanical core and its collaborators.
///
/// Every variant carries enough context to name the agent, obstacle or
/// parameter at fault. None of them is retried internally: the engine is
/// deterministic, so a failure can only be fixed by changing the input.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or physically inconsistent agent, obstacle or material data.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Non-finite or out-of-range force, velocity or penetration detected mid-run.
    ///
    /// The simulation keeps the last valid state and refuses further steps.
    #[error("numerical instability at step {step} (t = {time}): agent {agent}: {detail}")]
    NumericalInstability {
        /// Index of the step that failed (1-based, the step being computed).
        step: u64,
        /// Simulation time at the start of the failed step.
        time: f64,
        /// Id of the first offending agent.
        agent: u32,
        /// Which quantity went out of range.
        detail: String,
    },

    /// Operation not permitted in the current lifecycle phase.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Propagated I/O errors (scenario loading, trajectory output).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed scenario or frame JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand used by validation code throughout the crate.
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::InvalidConfiguration(msg.into())
    }

    /// Prefix a configuration error with the entity it concerns (e.g. `agent 3`).
    pub(crate) fn within(self, subject: impl std::fmt::Display) -> Self {
        match self {
            Error::InvalidConfiguration(msg) => {
                Error::InvalidConfiguration(format!("{subject}: {msg}"))
            }
            other => other,
        }
    }

    /// Process-style status code for host callers: `1` configuration, `2`
    /// instability, `3` lifecycle, `4` I/O, `5` JSON. Success is `0`.
    pub fn status_code(&self) -> i32 {
        match self {
            Error::InvalidConfiguration(_) => 1,
            Error::NumericalInstability { .. } => 2,
            Error::InvalidState(_) => 3,
            Error::Io(_) => 4,
            Error::Json(_) => 5,
        }
    }
}
