//! Error types for simulation operations.

use thiserror::Error;

/// Errors that can occur while building or stepping a simulation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Invalid timestep.
    #[error("invalid timestep: {0} (must be positive and finite)")]
    InvalidTimestep(f64),

    /// Simulation diverged (`NaN` or `Inf` detected).
    #[error("simulation diverged: {reason}")]
    Diverged {
        /// Description of what went wrong.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// Invalid mass properties.
    #[error("invalid mass properties: {reason}")]
    InvalidMassProperties {
        /// Description of what's wrong.
        reason: String,
    },

    /// A handle refers to an entity that has been removed from the solver.
    #[error("{kind} {handle} has been disposed")]
    Disposed {
        /// Kind of entity (`"body"`, `"actor"`, `"joint"`).
        kind: &'static str,
        /// Display form of the stale handle.
        handle: String,
    },

    /// An entity cannot be removed while something else still references it.
    #[error("{kind} {handle} is still referenced by {referenced_by}")]
    InUse {
        /// Kind of entity being removed.
        kind: &'static str,
        /// Display form of the handle being removed.
        handle: String,
        /// What still holds the reference.
        referenced_by: String,
    },
}

impl SimError {
    /// Create a diverged error.
    #[must_use]
    pub fn diverged(reason: impl Into<String>) -> Self {
        Self::Diverged {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid mass properties error.
    #[must_use]
    pub fn invalid_mass(reason: impl Into<String>) -> Self {
        Self::InvalidMassProperties {
            reason: reason.into(),
        }
    }

    /// Create a disposed-handle error.
    #[must_use]
    pub fn disposed(kind: &'static str, handle: impl std::fmt::Display) -> Self {
        Self::Disposed {
            kind,
            handle: handle.to_string(),
        }
    }

    /// Create an in-use error.
    #[must_use]
    pub fn in_use(
        kind: &'static str,
        handle: impl std::fmt::Display,
        referenced_by: impl Into<String>,
    ) -> Self {
        Self::InUse {
            kind,
            handle: handle.to_string(),
            referenced_by: referenced_by.into(),
        }
    }

    /// Check if this is a divergence error.
    #[must_use]
    pub fn is_diverged(&self) -> bool {
        matches!(self, Self::Diverged { .. })
    }

    /// Check if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }

    /// Check if this error came from a stale handle.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimError::InvalidTimestep(-0.5);
        assert!(err.to_string().contains("-0.5"));

        let err = SimError::disposed("body", "#3v2");
        assert_eq!(err.to_string(), "body #3v2 has been disposed");

        let err = SimError::in_use("body", "#0v0", "joint #1v0");
        assert!(err.to_string().contains("joint #1v0"));

        let err = SimError::diverged("NaN in velocity");
        assert!(err.to_string().contains("NaN"));
    }

    #[test]
    fn test_error_predicates() {
        let err = SimError::diverged("test");
        assert!(err.is_diverged());
        assert!(!err.is_config_error());

        let err = SimError::invalid_config("bad value");
        assert!(err.is_config_error());
        assert!(!err.is_diverged());

        assert!(SimError::disposed("joint", 7).is_disposed());
    }
}
