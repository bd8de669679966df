//! Contact material parameters and their pairwise mixing.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Mechanical parameters of a body surface (agent or obstacle).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Normal stiffness k (N/m, > 0).
    pub stiffness: f64,
    /// Normal damping c (N·s/m, >= 0).
    pub damping: f64,
    /// Coulomb friction coefficient μ (>= 0).
    pub friction: f64,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            stiffness: 5.0e4,
            damping: 1.0e3,
            friction: 0.5,
        }
    }
}

impl Material {
    /// Create a material after validating its parameters.
    pub fn new(stiffness: f64, damping: f64, friction: f64) -> Result<Self> {
        let m = Self {
            stiffness,
            damping,
            friction,
        };
        m.validate()?;
        Ok(m)
    }

    /// Frictionless variant of this material.
    #[must_use]
    pub fn frictionless(mut self) -> Self {
        self.friction = 0.0;
        self
    }

    /// Undamped variant of this material.
    #[must_use]
    pub fn undamped(mut self) -> Self {
        self.damping = 0.0;
        self
    }

    /// Check that all parameters are finite and physically meaningful.
    pub fn validate(&self) -> Result<()> {
        if !self.stiffness.is_finite() || self.stiffness <= 0.0 {
            return Err(Error::config(format!(
                "material stiffness must be finite and > 0, got {}",
                self.stiffness
            )));
        }
        if !self.damping.is_finite() || self.damping < 0.0 {
            return Err(Error::config(format!(
                "material damping must be finite and >= 0, got {}",
                self.damping
            )));
        }
        if !self.friction.is_finite() || self.friction < 0.0 {
            return Err(Error::config(format!(
                "material friction must be finite and >= 0, got {}",
                self.friction
            )));
        }
        Ok(())
    }
}

/// Effective parameters for one contacting pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactLaw {
    /// Normal stiffness.
    pub stiffness: f64,
    /// Normal damping.
    pub damping: f64,
    /// Friction coefficient.
    pub friction: f64,
}

impl ContactLaw {
    /// Mix two materials by arithmetic mean; identical materials mix to themselves.
    #[inline]
    pub fn mix(a: &Material, b: &Material) -> Self {
        Self {
            stiffness: 0.5 * (a.stiffness + b.stiffness),
            damping: 0.5 * (a.damping + b.damping),
            friction: 0.5 * (a.friction + b.friction),
        }
    }
}

impl From<Material> for ContactLaw {
    fn from(m: Material) -> Self {
        Self {
            stiffness: m.stiffness,
            damping: m.damping,
            friction: m.friction,
        }
    }
}
