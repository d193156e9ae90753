//! Pose and mass types for rigid bodies.
//!
//! A [`Pose`] is an immutable value: every operation returns a new pose and
//! the orientation is a [`UnitQuaternion`], so it stays normalized across
//! mutation by construction.

use nalgebra::{Point3, UnitQuaternion, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Position and orientation of a rigid body or a local joint frame.
///
/// # Example
///
/// ```
/// use sim_types::Pose;
/// use nalgebra::{Point3, UnitQuaternion, Vector3};
///
/// let pose = Pose::from_position(Point3::new(1.0, 2.0, 3.0));
///
/// let local = Point3::new(1.0, 0.0, 0.0);
/// let world = pose.transform_point(&local);
/// assert_eq!(world, Point3::new(2.0, 2.0, 3.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pose {
    /// Position in world coordinates.
    pub position: Point3<f64>,
    /// Orientation as a unit quaternion.
    pub rotation: UnitQuaternion<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    /// Create an identity pose (origin, no rotation).
    #[must_use]
    pub fn identity() -> Self {
        Self {
            position: Point3::origin(),
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from position only (identity rotation).
    #[must_use]
    pub fn from_position(position: Point3<f64>) -> Self {
        Self {
            position,
            rotation: UnitQuaternion::identity(),
        }
    }

    /// Create a pose from position and rotation.
    #[must_use]
    pub const fn from_position_rotation(
        position: Point3<f64>,
        rotation: UnitQuaternion<f64>,
    ) -> Self {
        Self { position, rotation }
    }

    /// Map a local point into world space: `rotate(local) + position`.
    #[must_use]
    pub fn transform_point(&self, local: &Point3<f64>) -> Point3<f64> {
        self.position + self.rotation * local.coords
    }

    /// Rotate a vector by this pose's orientation.
    #[must_use]
    pub fn rotate(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * v
    }

    /// Map a world point into this pose's local frame.
    #[must_use]
    pub fn inverse_transform_point(&self, world: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.inverse_rotate(&(world - self.position)))
    }

    /// Rotate a vector by the inverse of this pose's orientation.
    #[must_use]
    pub fn inverse_rotate(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse_transform_vector(v)
    }

    /// Same orientation, position moved by `delta`.
    #[must_use]
    pub fn translate(&self, delta: &Vector3<f64>) -> Self {
        Self {
            position: self.position + delta,
            rotation: self.rotation,
        }
    }

    /// Same position, new orientation.
    #[must_use]
    pub fn with_rotation(&self, rotation: UnitQuaternion<f64>) -> Self {
        Self {
            position: self.position,
            rotation,
        }
    }

    /// Compose two poses: `self * other`.
    ///
    /// Maps a frame expressed in this pose's local space into world space,
    /// which is how joint anchors follow their bodies.
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            position: self.transform_point(&other.position),
            rotation: self.rotation * other.rotation,
        }
    }

    /// Compute the inverse pose.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let inv_rotation = self.rotation.inverse();
        Self {
            position: Point3::from(-(inv_rotation * self.position.coords)),
            rotation: inv_rotation,
        }
    }

    /// Primary frame axis (local +X in world coordinates).
    ///
    /// Hinge joints rotate about this axis and swing/twist limits are
    /// measured relative to it.
    #[must_use]
    pub fn primary_axis(&self) -> Vector3<f64> {
        self.rotate(&Vector3::x())
    }

    /// Secondary frame axis (local +Y in world coordinates).
    #[must_use]
    pub fn secondary_axis(&self) -> Vector3<f64> {
        self.rotate(&Vector3::y())
    }

    /// Check if the pose contains `NaN` or `Inf` values.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.coords.iter().all(|x| x.is_finite())
            && self.rotation.coords.iter().all(|x| x.is_finite())
    }
}

/// Mass and diagonal inertia of a rigid body.
///
/// The solver only ever consumes the inverses: an infinite (or zero) mass
/// maps to an inverse mass of `0`, which every correction treats as an
/// immovable side.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MassProperties {
    /// Total mass in kg.
    pub mass: f64,
    /// Principal moments of inertia in local coordinates (kg·m²).
    pub inertia: Vector3<f64>,
}

impl MassProperties {
    /// Create mass properties with given values.
    #[must_use]
    pub const fn new(mass: f64, inertia: Vector3<f64>) -> Self {
        Self { mass, inertia }
    }

    /// A point mass: translates but has no rotational inertia to speak of.
    ///
    /// The inertia is left at zero, which the inverse maps to `0`, so point
    /// masses never rotate under corrections.
    #[must_use]
    pub fn point_mass(mass: f64) -> Self {
        Self {
            mass,
            inertia: Vector3::zeros(),
        }
    }

    /// Infinite mass: static or kinematic bodies.
    #[must_use]
    pub fn infinite() -> Self {
        Self {
            mass: f64::INFINITY,
            inertia: Vector3::repeat(f64::INFINITY),
        }
    }

    /// Create mass properties for a uniform sphere.
    ///
    /// Inertia of a solid sphere: I = (2/5) * m * r²
    #[must_use]
    pub fn sphere(mass: f64, radius: f64) -> Self {
        let i = 0.4 * mass * radius * radius;
        Self {
            mass,
            inertia: Vector3::new(i, i, i),
        }
    }

    /// Create mass properties for a uniform box.
    ///
    /// Inertia of a solid box with dimensions (x, y, z):
    /// - Ixx = (1/12) * m * (y² + z²)
    /// - Iyy = (1/12) * m * (x² + z²)
    /// - Izz = (1/12) * m * (x² + y²)
    #[must_use]
    pub fn box_shape(mass: f64, half_extents: Vector3<f64>) -> Self {
        let x2 = 4.0 * half_extents.x * half_extents.x;
        let y2 = 4.0 * half_extents.y * half_extents.y;
        let z2 = 4.0 * half_extents.z * half_extents.z;

        Self {
            mass,
            inertia: Vector3::new(
                mass * (y2 + z2) / 12.0,
                mass * (x2 + z2) / 12.0,
                mass * (x2 + y2) / 12.0,
            ),
        }
    }

    /// Create mass properties for a solid capsule aligned with local Y.
    ///
    /// Approximated as a cylinder of the full length, which is close enough
    /// for the small capsules ropes and limbs are built from.
    #[must_use]
    pub fn capsule(mass: f64, half_height: f64, radius: f64) -> Self {
        let r2 = radius * radius;
        let h = 2.0 * (half_height + radius);
        let ixz = mass * (3.0 * r2 + h * h) / 12.0;
        let iy = 0.5 * mass * r2;

        Self {
            mass,
            inertia: Vector3::new(ixz, iy, ixz),
        }
    }

    /// Get the inverse mass (0 if mass is infinite/static).
    #[must_use]
    pub fn inverse_mass(&self) -> f64 {
        invert(self.mass)
    }

    /// Get the component-wise inverse of the diagonal inertia.
    ///
    /// Zero or infinite principal moments invert to `0`.
    #[must_use]
    pub fn inverse_inertia(&self) -> Vector3<f64> {
        self.inertia.map(invert)
    }
}

fn invert(value: f64) -> f64 {
    if value == 0.0 || value.is_infinite() {
        0.0
    } else {
        1.0 / value
    }
}
