//! Convex collision shapes.
//!
//! Shapes are described in the body's local frame. The narrow phase only
//! ever needs a support mapping, plus a few analytic special cases for
//! spheres and half-spaces.

use nalgebra::{Point3, Vector3};
use sim_types::{MassProperties, Pose, SimError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tolerance for degenerate directions.
const EPSILON: f64 = 1e-12;

/// Convex shape attached to a body.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Shape {
    /// Sphere centered at the body origin.
    Sphere {
        /// Radius.
        radius: f64,
    },
    /// Box centered at the body origin.
    Cuboid {
        /// Half extents along the local axes.
        half_extents: Vector3<f64>,
    },
    /// Capsule along the local Y axis.
    Capsule {
        /// Half the distance between the two cap centers.
        half_height: f64,
        /// Radius of the caps and cylinder.
        radius: f64,
    },
    /// Convex hull of a point cloud in local coordinates.
    ConvexHull {
        /// Hull points. Interior points are harmless.
        points: Vec<Point3<f64>>,
    },
    /// Solid half-space below a plane through the body origin.
    ///
    /// Only sensible on static or kinematic bodies.
    HalfSpace {
        /// Outward plane normal in local coordinates.
        normal: Vector3<f64>,
    },
}

impl Shape {
    /// Create a sphere.
    #[must_use]
    pub const fn sphere(radius: f64) -> Self {
        Self::Sphere { radius }
    }

    /// Create a box from half extents.
    #[must_use]
    pub const fn cuboid(half_extents: Vector3<f64>) -> Self {
        Self::Cuboid { half_extents }
    }

    /// Create a Y-aligned capsule.
    #[must_use]
    pub const fn capsule(half_height: f64, radius: f64) -> Self {
        Self::Capsule {
            half_height,
            radius,
        }
    }

    /// Create a convex hull from points.
    #[must_use]
    pub fn convex_hull(points: impl Into<Vec<Point3<f64>>>) -> Self {
        Self::ConvexHull {
            points: points.into(),
        }
    }

    /// Create a half-space; the normal is normalized here.
    #[must_use]
    pub fn half_space(normal: Vector3<f64>) -> Self {
        Self::HalfSpace {
            normal: normal.try_normalize(EPSILON).unwrap_or_else(Vector3::z),
        }
    }

    /// A ground plane facing +Z.
    #[must_use]
    pub fn ground() -> Self {
        Self::HalfSpace {
            normal: Vector3::z(),
        }
    }

    /// Check whether this is an unbounded half-space.
    #[must_use]
    pub const fn is_half_space(&self) -> bool {
        matches!(self, Self::HalfSpace { .. })
    }

    /// Mass properties of a solid shape of the given mass.
    ///
    /// Hulls use their local bounding box. Half-spaces are always infinite.
    #[must_use]
    pub fn mass_properties(&self, mass: f64) -> MassProperties {
        match self {
            Self::Sphere { radius } => MassProperties::sphere(mass, *radius),
            Self::Cuboid { half_extents } => MassProperties::box_shape(mass, *half_extents),
            Self::Capsule {
                half_height,
                radius,
            } => MassProperties::capsule(mass, *half_height, *radius),
            Self::ConvexHull { points } => {
                let half_extents = points
                    .iter()
                    .fold(Vector3::zeros(), |acc: Vector3<f64>, p| acc.sup(&p.coords.abs()));
                MassProperties::box_shape(mass, half_extents)
            }
            Self::HalfSpace { .. } => MassProperties::infinite(),
        }
    }

    /// Validate dimensions.
    pub fn validate(&self) -> sim_types::Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        let ok = match self {
            Self::Sphere { radius } => positive(*radius),
            Self::Cuboid { half_extents } => half_extents.iter().all(|v| positive(*v)),
            Self::Capsule {
                half_height,
                radius,
            } => positive(*radius) && half_height.is_finite() && *half_height >= 0.0,
            Self::ConvexHull { points } => {
                !points.is_empty()
                    && points
                        .iter()
                        .all(|p| p.coords.iter().all(|v| v.is_finite()))
            }
            Self::HalfSpace { normal } => {
                normal.iter().all(|v| v.is_finite()) && normal.norm() > EPSILON
            }
        };

        if ok {
            Ok(())
        } else {
            Err(SimError::invalid_config(format!("degenerate shape: {self:?}")))
        }
    }

    /// World-space point of the shape furthest along `direction`.
    ///
    /// Returns `None` for half-spaces, which have no bounded support.
    #[must_use]
    pub fn support(&self, pose: &Pose, direction: &Vector3<f64>) -> Option<Point3<f64>> {
        match self {
            Self::Sphere { radius } => Some(support_sphere(pose, *radius, direction)),
            Self::Cuboid { half_extents } => Some(support_box(pose, half_extents, direction)),
            Self::Capsule {
                half_height,
                radius,
            } => Some(support_capsule(pose, *half_height, *radius, direction)),
            Self::ConvexHull { points } => Some(support_hull(pose, points, direction)),
            Self::HalfSpace { .. } => None,
        }
    }
}

fn support_sphere(pose: &Pose, radius: f64, direction: &Vector3<f64>) -> Point3<f64> {
    let dir_norm = direction.norm();
    if dir_norm < EPSILON {
        return pose.position;
    }
    pose.position + direction * (radius / dir_norm)
}

fn support_box(pose: &Pose, half_extents: &Vector3<f64>, direction: &Vector3<f64>) -> Point3<f64> {
    let local_dir = pose.inverse_rotate(direction);

    // sign(d_i) * half_extent_i for each axis
    let local_support = Point3::new(
        half_extents.x.copysign(local_dir.x),
        half_extents.y.copysign(local_dir.y),
        half_extents.z.copysign(local_dir.z),
    );

    pose.transform_point(&local_support)
}

fn support_capsule(
    pose: &Pose,
    half_height: f64,
    radius: f64,
    direction: &Vector3<f64>,
) -> Point3<f64> {
    let local_dir = pose.inverse_rotate(direction);

    let local_center = if local_dir.y >= 0.0 {
        Point3::new(0.0, half_height, 0.0)
    } else {
        Point3::new(0.0, -half_height, 0.0)
    };

    let dir_norm = direction.norm();
    let sphere_offset = if dir_norm > EPSILON {
        direction * (radius / dir_norm)
    } else {
        Vector3::zeros()
    };

    pose.transform_point(&local_center) + sphere_offset
}

fn support_hull(pose: &Pose, points: &[Point3<f64>], direction: &Vector3<f64>) -> Point3<f64> {
    let local_dir = pose.inverse_rotate(direction);

    let best = points
        .iter()
        .max_by(|a, b| {
            a.coords
                .dot(&local_dir)
                .total_cmp(&b.coords.dot(&local_dir))
        })
        .copied()
        .unwrap_or_else(Point3::origin);

    pose.transform_point(&best)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    #[test]
    fn test_support_sphere() {
        let pose = Pose::from_position(Point3::new(1.0, 2.0, 3.0));
        let p = Shape::sphere(0.5).support(&pose, &Vector3::x()).unwrap();
        assert_relative_eq!(p, Point3::new(1.5, 2.0, 3.0), epsilon = 1e-12);
    }

    #[test]
    fn test_support_box_diagonal() {
        let shape = Shape::cuboid(Vector3::new(1.0, 2.0, 3.0));
        let dir = Vector3::new(1.0, -1.0, 1.0);
        let p = shape.support(&Pose::identity(), &dir).unwrap();
        assert_relative_eq!(p, Point3::new(1.0, -2.0, 3.0), epsilon = 1e-12);
    }

    #[test]
    fn test_support_capsule_uses_local_y() {
        let shape = Shape::capsule(1.0, 0.25);
        let up = shape
            .support(&Pose::identity(), &Vector3::y())
            .unwrap();
        assert_relative_eq!(up.y, 1.25, epsilon = 1e-12);

        // Rotate the capsule so its axis lies along world X
        let pose = Pose::from_position_rotation(
            Point3::origin(),
            UnitQuaternion::from_euler_angles(0.0, 0.0, -std::f64::consts::FRAC_PI_2),
        );
        let side = shape.support(&pose, &Vector3::x()).unwrap();
        assert_relative_eq!(side.x, 1.25, epsilon = 1e-12);
    }

    #[test]
    fn test_support_hull_picks_extreme_vertex() {
        let shape = Shape::convex_hull(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]);
        let p = shape
            .support(&Pose::identity(), &Vector3::new(0.1, 0.2, 0.9))
            .unwrap();
        assert_relative_eq!(p, Point3::new(0.0, 0.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_half_space_has_no_support() {
        assert!(Shape::ground().support(&Pose::identity(), &Vector3::z()).is_none());
        let normal = match Shape::half_space(Vector3::new(0.0, 0.0, 2.0)) {
            Shape::HalfSpace { normal } => normal,
            _ => Vector3::zeros(),
        };
        assert_relative_eq!(normal, Vector3::z(), epsilon = 1e-12);
    }

    #[test]
    fn test_validate_rejects_degenerate_shapes() {
        assert!(Shape::sphere(1.0).validate().is_ok());
        assert!(Shape::sphere(0.0).validate().is_err());
        assert!(Shape::cuboid(Vector3::new(1.0, -1.0, 1.0)).validate().is_err());
        assert!(Shape::convex_hull(Vec::new()).validate().is_err());
        assert!(Shape::capsule(0.0, 0.5).validate().is_ok());
    }

    #[test]
    fn test_mass_properties_follow_shape() {
        let sphere = Shape::sphere(1.0).mass_properties(5.0);
        assert_relative_eq!(sphere.inertia.x, 2.0, epsilon = 1e-12);
        assert_eq!(Shape::ground().mass_properties(1.0).inverse_mass(), 0.0);
    }
}
