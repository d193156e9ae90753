//! Configuration types for the solver.
//!
//! Everything here is supplied once when the solver is created and is
//! immutable from the solver's perspective afterwards.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Uniform gravitational field.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Gravity {
    /// Acceleration in world coordinates (m/s²).
    pub acceleration: Vector3<f64>,
}

impl Default for Gravity {
    fn default() -> Self {
        Self::earth()
    }
}

impl Gravity {
    /// Earth gravity pointing down the Z axis.
    #[must_use]
    pub fn earth() -> Self {
        Self {
            acceleration: Vector3::new(0.0, 0.0, -9.81),
        }
    }

    /// No gravity.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            acceleration: Vector3::zeros(),
        }
    }

    /// Arbitrary acceleration vector.
    #[must_use]
    pub const fn new(acceleration: Vector3<f64>) -> Self {
        Self { acceleration }
    }

    /// Check if gravity is (effectively) disabled.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.acceleration.norm_squared() < f64::EPSILON
    }
}

/// Configuration for the XPBD solver.
///
/// # Example
///
/// ```
/// use sim_types::{Gravity, SolverConfig};
///
/// let config = SolverConfig::default()
///     .substeps(8)
///     .iterations(2, 1)
///     .gravity(Gravity::zero());
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverConfig {
    /// Gravity applied to every dynamic body and free particle.
    pub gravity: Gravity,
    /// Number of substeps per outer step.
    pub substeps: u32,
    /// Number of joint/actor position passes per substep.
    pub position_iterations: u32,
    /// Number of passes per collision-resolution phase.
    pub collision_iterations: u32,
    /// Coulomb coefficient used when neither body of a contact specifies one.
    pub default_friction: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            gravity: Gravity::earth(),
            substeps: 4,
            position_iterations: 1,
            collision_iterations: 1,
            default_friction: 0.5,
        }
    }
}

impl SolverConfig {
    /// Create a high-accuracy solver configuration.
    #[must_use]
    pub fn high_accuracy() -> Self {
        Self {
            substeps: 16,
            position_iterations: 4,
            collision_iterations: 2,
            ..Default::default()
        }
    }

    /// Create a fast solver configuration.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            substeps: 1,
            ..Default::default()
        }
    }

    /// Set the gravity.
    #[must_use]
    pub fn gravity(mut self, gravity: Gravity) -> Self {
        self.gravity = gravity;
        self
    }

    /// Disable gravity (zero-G environment).
    #[must_use]
    pub fn zero_gravity(mut self) -> Self {
        self.gravity = Gravity::zero();
        self
    }

    /// Set the number of substeps per outer step.
    #[must_use]
    pub fn substeps(mut self, substeps: u32) -> Self {
        self.substeps = substeps;
        self
    }

    /// Set the number of position and collision iterations.
    #[must_use]
    pub fn iterations(mut self, position: u32, collision: u32) -> Self {
        self.position_iterations = position;
        self.collision_iterations = collision;
        self
    }

    /// Set the default friction coefficient.
    #[must_use]
    pub fn friction(mut self, friction: f64) -> Self {
        self.default_friction = friction;
        self
    }

    /// Substep duration for an outer step of `dt`.
    #[must_use]
    pub fn substep_dt(&self, dt: f64) -> f64 {
        dt / f64::from(self.substeps.max(1))
    }

    /// Validate the solver configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.substeps == 0 {
            return Err(crate::SimError::invalid_config("substeps must be at least 1"));
        }

        if self.position_iterations == 0 {
            return Err(crate::SimError::invalid_config(
                "position_iterations must be at least 1",
            ));
        }

        if self.collision_iterations == 0 {
            return Err(crate::SimError::invalid_config(
                "collision_iterations must be at least 1",
            ));
        }

        if !self.default_friction.is_finite() || self.default_friction < 0.0 {
            return Err(crate::SimError::invalid_config(
                "friction must be finite and non-negative",
            ));
        }

        if self.gravity.acceleration.iter().any(|g| !g.is_finite()) {
            return Err(crate::SimError::invalid_config("gravity must be finite"));
        }

        Ok(())
    }
}
