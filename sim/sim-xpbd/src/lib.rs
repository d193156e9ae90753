//! Extended Position-Based Dynamics for rigid bodies, ropes and joints.
//!
//! This crate is the simulation kernel of the XPBD stack. It advances rigid
//! bodies and particle chains under gravity, drag, joints and contacts by
//! projecting positions directly instead of integrating forces.
//!
//! # Physics Model
//!
//! Every constraint is resolved through one primitive,
//! [`apply_body_pair_correction`]: a correction vector is split between two
//! (optional) bodies by their generalized inverse masses along the
//! correction direction, softened by the constraint's compliance:
//!
//! ```text
//!   λ  = -|c| / (w₀ + w₁ + α / h²)
//!   Δ₀ = -λ n      Δ₁ = +λ n
//! ```
//!
//! ## Substep Pipeline
//!
//! ```text
//! For each substep (h = dt / substeps):
//!   1. previous := current
//!   2. v += g h, drag
//!   3. x += v h, q += ½ ω h q
//!   4. resolve collisions
//!   5. solve joint positions        (× position_iterations)
//!   6. solve rope constraints       (× position_iterations)
//!   7. resolve collisions again
//!   8. clear contacts
//!   9. v = (x - previous) / h, ω from the quaternion delta
//!  10. joint velocity damping
//! ```
//!
//! # Entities
//!
//! | Entity                | Owned by  | Referenced through |
//! |-----------------------|-----------|--------------------|
//! | [`Body`]              | [`Solver`] | [`BodyHandle`]    |
//! | [`Actor`] (rope)      | [`Solver`] | [`ActorHandle`]   |
//! | [`Joint`]             | [`Solver`] | [`JointHandle`]   |
//! | [`Contact`]           | [`CollisionSystem`], one substep | - |
//!
//! Handles are generational: once an entity is removed its handle reports
//! [`SimError::Disposed`] instead of reaching whatever reuses the slot.
//!
//! # Quick Start
//!
//! ```
//! use nalgebra::{Point3, Vector3};
//! use sim_types::{MassProperties, Pose, SolverConfig};
//! use sim_xpbd::{ActorAnchors, Body, JointParams, Shape, Solver};
//!
//! let mut solver = Solver::new(SolverConfig::default()).unwrap();
//!
//! // Ground plane and a box resting on it
//! solver.add_body(Body::fixed(Pose::identity()).with_shape(Shape::ground())).unwrap();
//! let crate_box = solver
//!     .add_body(Body::with_shape_mass(
//!         Pose::from_position(Point3::new(0.0, 0.0, 0.5)),
//!         Shape::cuboid(Vector3::new(0.5, 0.5, 0.5)),
//!         10.0,
//!     ))
//!     .unwrap();
//!
//! // A pendulum hanging from a world point
//! let bob = solver
//!     .add_body(Body::new(
//!         Pose::from_position(Point3::new(3.0, 0.0, 1.0)),
//!         MassProperties::sphere(1.0, 0.1),
//!     ))
//!     .unwrap();
//! solver
//!     .connect(
//!         None,
//!         Some(bob),
//!         JointParams::distance(1.0)
//!             .with_anchor_local(Pose::from_position(Point3::new(3.0, 0.0, 2.0))),
//!     )
//!     .unwrap();
//!
//! // A rope from the box to a fixed point overhead
//! solver
//!     .add_rope(
//!         ActorAnchors::between(None, Some(crate_box))
//!             .with_anchor_local(Pose::from_position(Point3::new(0.0, 0.0, 3.0))),
//!         0.25,
//!         Vector3::zeros(),
//!     )
//!     .unwrap();
//!
//! for _ in 0..60 {
//!     solver.step(1.0 / 60.0).unwrap();
//! }
//! ```
//!
//! # Layer 0 Crate
//!
//! No rendering or engine dependencies. Scene management, shape loading and
//! visualization belong to the caller.

#![doc(html_root_url = "https://docs.rs/sim-xpbd/0.1.0")]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(missing_docs)]
// Allow precision loss when converting indices to f64 - these are small values
#![allow(clippy::cast_precision_loss)]
// Slot indices are u32; arenas never grow past that
#![allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
// Correction primitives take both sides' optional points explicitly
#![allow(clippy::too_many_arguments)]
#![allow(
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::missing_errors_doc,
    clippy::many_single_char_names,
)]
// Test-related lints - these are style preferences
#![cfg_attr(test, allow(clippy::uninlined_format_args, clippy::float_cmp))]

pub mod actor;
pub mod arena;
pub mod body;
pub mod collision;
pub mod contact;
pub mod gjk_epa;
pub mod joint;
pub mod particle;
pub mod shape;
pub mod solver;

pub use actor::{Actor, ActorAnchors, DEFAULT_PARTICLE_MASS, MAX_ROPE_PARTICLES};
pub use arena::Arena;
pub use body::{Body, MAX_ROTATION_PER_SUBSTEP, apply_body_pair_correction, limit_angle};
pub use collision::CollisionSystem;
pub use contact::{Contact, Penetration, PenetrationQuery, tangential_split};
pub use gjk_epa::GjkEpa;
pub use joint::{AngleLimits, Joint, JointKind, JointParams};
pub use particle::{DistanceConstraint, Particle};
pub use shape::Shape;
pub use solver::{Solver, StepReport, SubstepPhase};

// Re-export the shared data types
pub use sim_types::{
    ActorHandle, BodyHandle, Gravity, Handle, JointHandle, MassProperties, Pose, Result,
    SimError, SolverConfig,
};
