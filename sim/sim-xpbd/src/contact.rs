//! Contact geometry and the narrow-phase seam.

use nalgebra::{Point3, Vector3};
use sim_types::{BodyHandle, Pose};

use crate::shape::Shape;

/// Overlap between two shapes, as reported by a [`PenetrationQuery`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Penetration {
    /// World-space contact point, roughly midway through the overlap.
    pub point: Point3<f64>,
    /// Unit normal pointing from the first shape toward the second.
    pub normal: Vector3<f64>,
    /// Penetration depth, positive when overlapping.
    pub depth: f64,
}

/// Narrow-phase collaborator used by the collision system.
///
/// Implementations must return `None` for separated or merely touching
/// shapes and a unit normal oriented from `shape0` toward `shape1`.
pub trait PenetrationQuery {
    /// Compute the overlap of `shape0` at `pose0` and `shape1` at `pose1`.
    fn penetrate(
        &self,
        shape0: &Shape,
        pose0: &Pose,
        shape1: &Shape,
        pose1: &Pose,
    ) -> Option<Penetration>;
}

/// A resolved contact, kept for the remainder of one substep.
///
/// Body references are `None` for kinematic and static sides, which the
/// solver treats as infinitely heavy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// First body, if dynamic.
    pub body0: Option<BodyHandle>,
    /// Second body, if dynamic.
    pub body1: Option<BodyHandle>,
    /// World-space contact point.
    pub point: Point3<f64>,
    /// Unit normal from `body0` toward `body1`.
    pub normal: Vector3<f64>,
    /// Signed separation; negative while penetrating.
    pub separation: f64,
    /// Coulomb coefficient for the pair.
    pub friction: f64,
    /// Direction of the relative tangential velocity `v0 - v1`, or zero.
    pub tangent_direction: Vector3<f64>,
    /// Magnitude of the relative tangential velocity.
    pub tangent_speed: f64,
}

impl Contact {
    /// Penetration depth (never negative).
    #[must_use]
    pub fn depth(&self) -> f64 {
        (-self.separation).max(0.0)
    }

    /// Check if the contact has any tangential sliding to oppose.
    #[must_use]
    pub fn is_sliding(&self) -> bool {
        self.tangent_speed > 0.0
    }
}

/// Split a relative point velocity into its tangential direction and speed.
///
/// `relative` is `v0 - v1` at the contact point. A zero tangential component
/// yields a zero direction.
#[must_use]
pub fn tangential_split(relative: &Vector3<f64>, normal: &Vector3<f64>) -> (Vector3<f64>, f64) {
    let tangential = relative - normal * relative.dot(normal);
    let speed = tangential.norm();
    if speed > 0.0 {
        (tangential / speed, speed)
    } else {
        (Vector3::zeros(), 0.0)
    }
}
