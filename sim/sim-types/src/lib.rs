//! Core types for the XPBD solver.
//!
//! This crate provides the foundational, behavior-free types shared by the
//! solver and the application code that drives it:
//!
//! - [`Pose`] - Position and orientation, with transform composition
//! - [`MassProperties`] - Mass and diagonal inertia
//! - [`BodyHandle`], [`ActorHandle`], [`JointHandle`] - Generational handles
//! - [`SolverConfig`], [`Gravity`] - Solver settings
//! - [`SimError`] - Error type for every fallible operation
//!
//! # Design Philosophy
//!
//! These types are **pure data**. Integration, constraint projection and
//! collision live in `sim-xpbd`; anything that only needs to describe a
//! scene (loaders, tools, tests) can depend on this crate alone.
//!
//! # Coordinate System
//!
//! Consistent with the CortenForge ecosystem:
//!
//! - X: right
//! - Y: forward
//! - Z: up
//! - Right-handed
//!
//! # Example
//!
//! ```
//! use sim_types::{MassProperties, Pose};
//! use nalgebra::{Point3, Vector3};
//!
//! let pose = Pose::from_position(Point3::new(0.0, 0.0, 1.0));
//! let mass = MassProperties::sphere(2.0, 0.5);
//!
//! assert_eq!(pose.position.z, 1.0);
//! assert!((mass.inverse_mass() - 0.5).abs() < 1e-12);
//! ```

#![doc(html_root_url = "https://docs.rs/sim-types/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
// Allow certain clippy lints that are overly pedantic for type definitions
#![allow(
    clippy::missing_const_for_fn,     // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,          // mul_add style changes aren't always clearer
    clippy::missing_errors_doc,        // Error docs added where non-obvious
)]

mod body;
mod config;
mod error;
mod handle;

pub use body::{MassProperties, Pose};
pub use config::{Gravity, SolverConfig};
pub use error::SimError;
pub use handle::{ActorHandle, BodyHandle, Handle, JointHandle};

// Re-export math types for convenience
pub use nalgebra::{Point3, Quaternion, UnitQuaternion, Vector3};

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimError>;
