//! GJK (Gilbert-Johnson-Keerthi) and EPA (Expanding Polytope Algorithm).
//!
//! GJK decides whether the Minkowski difference `A - B` of two convex shapes
//! contains the origin; if it does, EPA expands the final simplex toward the
//! boundary closest to the origin, which yields the penetration depth and
//! normal. The closest boundary point is `n * depth`: translating `A` by
//! `-n * depth` separates the shapes, so `n` points from `A` toward `B`.
//!
//! [`GjkEpa`] wraps both behind [`PenetrationQuery`] and short-circuits the
//! pairs that have a cheap exact answer (sphere-sphere, anything against a
//! half-space).
//!
//! # References
//!
//! - Gilbert, Johnson, Keerthi: "A Fast Procedure for Computing the Distance
//!   Between Complex Objects in Three-Dimensional Space" (1988)
//! - van den Bergen: "Collision Detection in Interactive 3D Environments" (2003)

use nalgebra::{Point3, Vector3};
use sim_types::Pose;
use smallvec::SmallVec;

use crate::contact::{Penetration, PenetrationQuery};
use crate::shape::Shape;

/// Tolerance for numerical comparisons in GJK/EPA.
const EPSILON: f64 = 1e-8;

/// Maximum iterations for GJK before giving up.
const GJK_MAX_ITERATIONS: usize = 64;

/// Maximum iterations for EPA before giving up.
const EPA_MAX_ITERATIONS: usize = 64;

/// Maximum faces in EPA polytope.
const EPA_MAX_FACES: usize = 128;

/// EPA convergence tolerance.
const EPA_TOLERANCE: f64 = 1e-6;

/// Default narrow phase: analytic special cases, GJK+EPA otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GjkEpa;

impl PenetrationQuery for GjkEpa {
    fn penetrate(
        &self,
        shape0: &Shape,
        pose0: &Pose,
        shape1: &Shape,
        pose1: &Pose,
    ) -> Option<Penetration> {
        match (shape0, shape1) {
            (Shape::HalfSpace { .. }, Shape::HalfSpace { .. }) => None,
            (other, Shape::HalfSpace { normal }) => {
                penetrate_half_space(other, pose0, &pose1.rotate(normal), pose1)
            }
            (Shape::HalfSpace { normal }, other) => {
                penetrate_half_space(other, pose1, &pose0.rotate(normal), pose0).map(|p| {
                    Penetration {
                        normal: -p.normal,
                        ..p
                    }
                })
            }
            (Shape::Sphere { radius: r0 }, Shape::Sphere { radius: r1 }) => {
                penetrate_spheres(pose0, *r0, pose1, *r1)
            }
            _ => gjk_epa_penetration(shape0, pose0, shape1, pose1),
        }
    }
}

/// Exact sphere-sphere overlap.
fn penetrate_spheres(pose0: &Pose, r0: f64, pose1: &Pose, r1: f64) -> Option<Penetration> {
    let delta = pose1.position - pose0.position;
    let distance = delta.norm();
    let depth = r0 + r1 - distance;
    if depth <= 0.0 {
        return None;
    }

    // Coincident centers: any direction separates them
    let normal = if distance > EPSILON {
        delta / distance
    } else {
        Vector3::z()
    };

    Some(Penetration {
        point: pose0.position + normal * (r0 - 0.5 * depth),
        normal,
        depth,
    })
}

/// Overlap of a bounded shape with a half-space whose world normal is
/// `plane_normal` and which passes through `plane_pose.position`.
///
/// The returned normal points from the bounded shape into the half-space.
fn penetrate_half_space(
    shape: &Shape,
    pose: &Pose,
    plane_normal: &Vector3<f64>,
    plane_pose: &Pose,
) -> Option<Penetration> {
    let deepest = shape.support(pose, &-plane_normal)?;
    let depth = (plane_pose.position - deepest).dot(plane_normal);
    if depth <= 0.0 {
        return None;
    }

    Some(Penetration {
        point: deepest + plane_normal * (0.5 * depth),
        normal: -plane_normal,
        depth,
    })
}

// =============================================================================
// GJK Algorithm
// =============================================================================

/// A point in Minkowski space, with support points from both shapes.
#[derive(Debug, Clone, Copy)]
struct MinkowskiPoint {
    point: Point3<f64>,
    support_a: Point3<f64>,
}

/// A GJK simplex: point, segment, triangle or tetrahedron.
///
/// The most recently added point is always at index 0.
#[derive(Debug, Clone, Default)]
struct Simplex {
    points: SmallVec<[MinkowskiPoint; 4]>,
}

impl Simplex {
    fn push(&mut self, point: MinkowskiPoint) {
        self.points.insert(0, point);
        self.points.truncate(4);
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    fn set(&mut self, indices: &[usize]) {
        self.points = indices.iter().map(|&i| self.points[i]).collect();
    }
}

fn support_minkowski(
    shape_a: &Shape,
    pose_a: &Pose,
    shape_b: &Shape,
    pose_b: &Pose,
    direction: &Vector3<f64>,
) -> Option<MinkowskiPoint> {
    let support_a = shape_a.support(pose_a, direction)?;
    let support_b = shape_b.support(pose_b, &-direction)?;
    Some(MinkowskiPoint {
        point: Point3::from(support_a - support_b),
        support_a,
    })
}

/// Run GJK; returns the enclosing simplex when the shapes intersect.
fn gjk(shape_a: &Shape, pose_a: &Pose, shape_b: &Shape, pose_b: &Pose) -> Option<Simplex> {
    let mut direction = pose_b.position - pose_a.position;
    if direction.norm_squared() < EPSILON * EPSILON {
        direction = Vector3::x();
    }

    let mut simplex = Simplex::default();
    let first = support_minkowski(shape_a, pose_a, shape_b, pose_b, &direction)?;
    simplex.push(first);
    direction = -first.point.coords;

    for _ in 0..GJK_MAX_ITERATIONS {
        if direction.norm_squared() < EPSILON * EPSILON {
            // Origin lies on the simplex: touching counts as intersecting
            return Some(simplex);
        }
        direction = direction.normalize();

        let new_point = support_minkowski(shape_a, pose_a, shape_b, pose_b, &direction)?;
        if new_point.point.coords.dot(&direction) < -EPSILON {
            return None;
        }

        simplex.push(new_point);
        if do_simplex(&mut simplex, &mut direction) {
            return Some(simplex);
        }
    }

    None
}

/// Reduce the simplex to the feature closest to the origin.
///
/// Returns true if the origin is enclosed.
fn do_simplex(simplex: &mut Simplex, direction: &mut Vector3<f64>) -> bool {
    match simplex.len() {
        2 => do_simplex_line(simplex, direction),
        3 => do_simplex_triangle(simplex, direction),
        4 => do_simplex_tetrahedron(simplex, direction),
        _ => false,
    }
}

fn do_simplex_line(simplex: &mut Simplex, direction: &mut Vector3<f64>) -> bool {
    let a = simplex.points[0].point;
    let b = simplex.points[1].point;

    let ab = b - a;
    let ao = -a.coords;

    if ab.dot(&ao) > 0.0 {
        *direction = triple_product(&ab, &ao, &ab);
    } else {
        simplex.set(&[0]);
        *direction = ao;
    }

    false
}

fn do_simplex_triangle(simplex: &mut Simplex, direction: &mut Vector3<f64>) -> bool {
    let a = simplex.points[0].point;
    let b = simplex.points[1].point;
    let c = simplex.points[2].point;

    let ab = b - a;
    let ac = c - a;
    let ao = -a.coords;

    let abc = ab.cross(&ac);

    if abc.cross(&ac).dot(&ao) > 0.0 {
        if ac.dot(&ao) > 0.0 {
            simplex.set(&[0, 2]);
            *direction = triple_product(&ac, &ao, &ac);
        } else {
            simplex_edge_ab(simplex, direction, &ab, &ao);
        }
    } else if ab.cross(&abc).dot(&ao) > 0.0 {
        simplex_edge_ab(simplex, direction, &ab, &ao);
    } else if abc.dot(&ao) > 0.0 {
        *direction = abc;
    } else {
        // Below the triangle: flip winding
        simplex.set(&[0, 2, 1]);
        *direction = -abc;
    }

    false
}

fn simplex_edge_ab(
    simplex: &mut Simplex,
    direction: &mut Vector3<f64>,
    ab: &Vector3<f64>,
    ao: &Vector3<f64>,
) {
    if ab.dot(ao) > 0.0 {
        simplex.set(&[0, 1]);
        *direction = triple_product(ab, ao, ab);
    } else {
        simplex.set(&[0]);
        *direction = *ao;
    }
}

fn do_simplex_tetrahedron(simplex: &mut Simplex, direction: &mut Vector3<f64>) -> bool {
    let a = simplex.points[0].point;
    let b = simplex.points[1].point;
    let c = simplex.points[2].point;
    let d = simplex.points[3].point;

    let ab = b - a;
    let ac = c - a;
    let ad = d - a;
    let ao = -a.coords;

    if ab.cross(&ac).dot(&ao) > 0.0 {
        simplex.set(&[0, 1, 2]);
        return do_simplex_triangle(simplex, direction);
    }

    if ac.cross(&ad).dot(&ao) > 0.0 {
        simplex.set(&[0, 2, 3]);
        return do_simplex_triangle(simplex, direction);
    }

    if ad.cross(&ab).dot(&ao) > 0.0 {
        simplex.set(&[0, 3, 1]);
        return do_simplex_triangle(simplex, direction);
    }

    true
}

/// Triple product: (A × B) × C = B(A·C) - A(B·C).
#[inline]
fn triple_product(a: &Vector3<f64>, b: &Vector3<f64>, c: &Vector3<f64>) -> Vector3<f64> {
    b * a.dot(c) - a * b.dot(c)
}

// =============================================================================
// EPA Algorithm
// =============================================================================

#[derive(Debug, Clone)]
struct EpaFace {
    vertices: [usize; 3],
    normal: Vector3<f64>,
    distance: f64,
}

/// GJK followed by EPA for two bounded convex shapes.
fn gjk_epa_penetration(
    shape_a: &Shape,
    pose_a: &Pose,
    shape_b: &Shape,
    pose_b: &Pose,
) -> Option<Penetration> {
    let simplex = gjk(shape_a, pose_a, shape_b, pose_b)?;
    let vertices = expand_to_tetrahedron(shape_a, pose_a, shape_b, pose_b, simplex)?;
    let (face, vertices) = epa(shape_a, pose_a, shape_b, pose_b, vertices)?;

    let depth = face.distance.max(0.0);
    if depth <= 0.0 {
        return None;
    }

    // Average the witness points on A of the closest face, then step back
    // half the depth so the point sits inside the overlap
    let witness = face
        .vertices
        .iter()
        .map(|&i| vertices[i].support_a.coords)
        .sum::<Vector3<f64>>()
        / 3.0;

    Some(Penetration {
        point: Point3::from(witness) - face.normal * (0.5 * depth),
        normal: face.normal,
        depth,
    })
}

fn expand_to_tetrahedron(
    shape_a: &Shape,
    pose_a: &Pose,
    shape_b: &Shape,
    pose_b: &Pose,
    simplex: Simplex,
) -> Option<Vec<MinkowskiPoint>> {
    let mut vertices: Vec<MinkowskiPoint> = simplex.points.into_vec();

    let search_dirs = [
        Vector3::x(),
        Vector3::y(),
        Vector3::z(),
        -Vector3::x(),
        -Vector3::y(),
        -Vector3::z(),
    ];

    for dir in &search_dirs {
        if vertices.len() >= 4 {
            break;
        }

        let candidate = support_minkowski(shape_a, pose_a, shape_b, pose_b, dir)?;
        let is_new = vertices
            .iter()
            .all(|v| (v.point - candidate.point).norm() > EPSILON);
        if is_new {
            vertices.push(candidate);
        }
    }

    // Fewer than four distinct points means a degenerate (flat) overlap
    (vertices.len() >= 4).then_some(vertices)
}

fn epa(
    shape_a: &Shape,
    pose_a: &Pose,
    shape_b: &Shape,
    pose_b: &Pose,
    mut vertices: Vec<MinkowskiPoint>,
) -> Option<(EpaFace, Vec<MinkowskiPoint>)> {
    let mut faces: Vec<EpaFace> = [[0, 1, 2], [0, 2, 3], [0, 3, 1], [1, 3, 2]]
        .into_iter()
        .filter_map(|indices| create_face(&vertices, indices))
        .collect();
    fix_face_orientations(&vertices, &mut faces);

    for _ in 0..EPA_MAX_ITERATIONS {
        let closest = faces[find_closest_face(&faces)?].clone();

        let new_point = support_minkowski(shape_a, pose_a, shape_b, pose_b, &closest.normal)?;
        if new_point.point.coords.dot(&closest.normal) - closest.distance < EPA_TOLERANCE {
            return Some((closest, vertices));
        }

        let new_index = vertices.len();
        vertices.push(new_point);

        // Remove every face that can see the new point, keeping the horizon
        let mut horizon: SmallVec<[(usize, usize); 16]> = SmallVec::new();
        faces.retain(|face| {
            let to_new = new_point.point - vertices[face.vertices[0]].point;
            if face.normal.dot(&to_new) > 0.0 {
                let [a, b, c] = face.vertices;
                add_edge(&mut horizon, a, b);
                add_edge(&mut horizon, b, c);
                add_edge(&mut horizon, c, a);
                false
            } else {
                true
            }
        });

        for (a, b) in horizon {
            if let Some(face) = create_face(&vertices, [new_index, a, b]) {
                faces.push(face);
            }
        }

        if faces.len() > EPA_MAX_FACES {
            break;
        }
    }

    let closest = faces[find_closest_face(&faces)?].clone();
    Some((closest, vertices))
}

fn create_face(vertices: &[MinkowskiPoint], indices: [usize; 3]) -> Option<EpaFace> {
    let a = vertices[indices[0]].point;
    let b = vertices[indices[1]].point;
    let c = vertices[indices[2]].point;

    let normal = (b - a).cross(&(c - a));
    let norm = normal.norm();
    if norm < EPSILON {
        return None;
    }

    let normal = normal / norm;
    Some(EpaFace {
        vertices: indices,
        normal,
        distance: a.coords.dot(&normal),
    })
}

/// Flip faces so every normal points away from the polytope centroid.
fn fix_face_orientations(vertices: &[MinkowskiPoint], faces: &mut [EpaFace]) {
    let centroid: Vector3<f64> = vertices
        .iter()
        .map(|v| v.point.coords)
        .sum::<Vector3<f64>>()
        / vertices.len() as f64;

    for face in faces.iter_mut() {
        let to_centroid = centroid - vertices[face.vertices[0]].point.coords;
        if face.normal.dot(&to_centroid) > 0.0 {
            face.normal = -face.normal;
            face.distance = -face.distance;
            face.vertices.swap(1, 2);
        }
    }
}

fn find_closest_face(faces: &[EpaFace]) -> Option<usize> {
    faces
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.distance.abs().total_cmp(&b.distance.abs()))
        .map(|(i, _)| i)
}

/// Add an edge to the horizon, cancelling it if the reverse is already there.
fn add_edge(edges: &mut SmallVec<[(usize, usize); 16]>, a: usize, b: usize) {
    if let Some(idx) = edges
        .iter()
        .position(|&(x, y)| (x == b && y == a) || (x == a && y == b))
    {
        edges.swap_remove(idx);
    } else {
        edges.push((a, b));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pose_at(x: f64, y: f64, z: f64) -> Pose {
        Pose::from_position(Point3::new(x, y, z))
    }

    #[test]
    fn test_spheres_overlapping() {
        let p = GjkEpa
            .penetrate(
                &Shape::sphere(1.0),
                &pose_at(0.0, 0.0, 0.0),
                &Shape::sphere(1.0),
                &pose_at(1.5, 0.0, 0.0),
            )
            .expect("spheres overlap");

        assert_relative_eq!(p.depth, 0.5, epsilon = 1e-12);
        assert_relative_eq!(p.normal, Vector3::x(), epsilon = 1e-12);
        assert_relative_eq!(p.point.x, 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_spheres_separated() {
        let p = GjkEpa.penetrate(
            &Shape::sphere(1.0),
            &pose_at(0.0, 0.0, 0.0),
            &Shape::sphere(1.0),
            &pose_at(3.0, 0.0, 0.0),
        );
        assert!(p.is_none());
    }

    #[test]
    fn test_box_on_ground() {
        let ground = Shape::ground();
        let cube = Shape::cuboid(Vector3::new(0.5, 0.5, 0.5));

        // Cube center at z = 0.4 sinks 0.1 into the ground
        let p = GjkEpa
            .penetrate(&cube, &pose_at(0.0, 0.0, 0.4), &ground, &Pose::identity())
            .expect("cube touches ground");
        assert_relative_eq!(p.depth, 0.1, epsilon = 1e-12);
        assert_relative_eq!(p.normal, -Vector3::z(), epsilon = 1e-12);

        // Swapped order flips the normal
        let p = GjkEpa
            .penetrate(&ground, &Pose::identity(), &cube, &pose_at(0.0, 0.0, 0.4))
            .expect("cube touches ground");
        assert_relative_eq!(p.normal, Vector3::z(), epsilon = 1e-12);

        let above = GjkEpa.penetrate(&cube, &pose_at(0.0, 0.0, 0.6), &ground, &Pose::identity());
        assert!(above.is_none());
    }

    #[test]
    fn test_half_spaces_never_collide() {
        let ground = Shape::ground();
        assert!(
            GjkEpa
                .penetrate(&ground, &Pose::identity(), &ground, &Pose::identity())
                .is_none()
        );
    }

    #[test]
    fn test_gjk_epa_boxes_along_x() {
        let cube = Shape::cuboid(Vector3::new(0.5, 0.5, 0.5));
        let p = GjkEpa
            .penetrate(&cube, &pose_at(0.0, 0.0, 0.0), &cube, &pose_at(0.8, 0.1, 0.0))
            .expect("boxes overlap");

        assert_relative_eq!(p.depth, 0.2, epsilon = 1e-5);
        assert_relative_eq!(p.normal.x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_gjk_epa_sphere_box() {
        let p = GjkEpa
            .penetrate(
                &Shape::sphere(0.5),
                &pose_at(0.0, 0.0, 0.9),
                &Shape::cuboid(Vector3::new(0.5, 0.5, 0.5)),
                &pose_at(0.0, 0.0, 0.0),
            )
            .expect("sphere rests in box top");

        // Normal points from the sphere down into the box
        assert!(p.normal.z < -0.9);
        assert!(p.depth > 0.05 && p.depth < 0.15);
    }

    #[test]
    fn test_gjk_separated_hulls() {
        let tetra = Shape::convex_hull(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]);
        assert!(gjk(&tetra, &pose_at(0.0, 0.0, 0.0), &tetra, &pose_at(3.0, 0.0, 0.0)).is_none());
        assert!(gjk(&tetra, &pose_at(0.0, 0.0, 0.0), &tetra, &pose_at(0.2, 0.2, 0.2)).is_some());
    }

    #[test]
    fn test_simplex_keeps_newest_first() {
        let mk = |x: f64| MinkowskiPoint {
            point: Point3::new(x, 0.0, 0.0),
            support_a: Point3::origin(),
        };
        let mut simplex = Simplex::default();
        for i in 0..5 {
            simplex.push(mk(f64::from(i)));
        }
        assert_eq!(simplex.len(), 4);
        assert_relative_eq!(simplex.points[0].point.x, 4.0);

        simplex.set(&[0, 2]);
        assert_eq!(simplex.len(), 2);
        assert_relative_eq!(simplex.points[1].point.x, 2.0);
    }
}
