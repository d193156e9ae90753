//! End-to-end solver tests.
//!
//! Each test builds a small scene, steps it through the public API and checks
//! the observable motion: free fall, ropes, contacts, friction and joints.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use approx::assert_relative_eq;
use nalgebra::{Point3, Vector3};
use sim_xpbd::{
    Actor, ActorAnchors, Body, DistanceConstraint, Gravity, JointParams, MassProperties,
    Particle, Penetration, PenetrationQuery, Pose, Shape, SimError, Solver, SolverConfig,
};

const DT: f64 = 1.0 / 60.0;

fn point_mass_at(position: Point3<f64>) -> Body {
    Body::new(Pose::from_position(position), MassProperties::point_mass(1.0))
}

fn ground() -> Body {
    Body::fixed(Pose::identity()).with_shape(Shape::ground())
}

// =============================================================================
// Integration
// =============================================================================

#[test]
fn free_fall_follows_verlet_start_up() {
    let g = -9.81;
    let mut solver = Solver::new(SolverConfig::default().substeps(1)).unwrap();
    let h = solver.add_body(point_mass_at(Point3::origin())).unwrap();

    solver.step(DT).unwrap();
    let z1 = solver.body(h).unwrap().pose.position.z;
    assert_relative_eq!(z1, 0.5 * g * DT * DT, epsilon = 1e-12);

    solver.step(DT).unwrap();
    let z2 = solver.body(h).unwrap().pose.position.z;
    assert_relative_eq!(z2 - z1, 1.5 * g * DT * DT, epsilon = 1e-12);
}

#[test]
fn free_fall_over_substeps_matches_single_verlet_step() {
    // Substep displacements 0.5, 1.5, 2.5, 3.5 (g h²) add up to ½ g dt²
    let mut solver = Solver::new(SolverConfig::default().substeps(4)).unwrap();
    let h = solver.add_body(point_mass_at(Point3::origin())).unwrap();

    solver.step(DT).unwrap();

    assert_relative_eq!(
        solver.body(h).unwrap().pose.position.z,
        0.5 * -9.81 * DT * DT,
        epsilon = 1e-12
    );
}

#[test]
fn custom_gravity_is_applied() {
    let config = SolverConfig::default()
        .substeps(1)
        .gravity(Gravity::new(Vector3::new(2.0, 0.0, 0.0)));
    let mut solver = Solver::new(config).unwrap();
    let h = solver.add_body(point_mass_at(Point3::origin())).unwrap();

    solver.step(0.1).unwrap();

    let body = solver.body(h).unwrap();
    assert_relative_eq!(body.pose.position.x, 0.01, epsilon = 1e-12);
    assert_eq!(body.pose.position.z, 0.0);
}

#[test]
fn drag_slows_a_moving_body() {
    let mut solver = Solver::new(SolverConfig::default().zero_gravity()).unwrap();
    let h = solver
        .add_body(
            point_mass_at(Point3::origin())
                .with_drag(Vector3::new(1.0, 1.0, 1.0))
                .with_velocity(Vector3::new(1.0, 0.0, 0.0), Vector3::zeros()),
        )
        .unwrap();

    for _ in 0..60 {
        solver.step(DT).unwrap();
    }

    let v = solver.body(h).unwrap().velocity.x;
    assert!(v > 0.3 && v < 0.4, "velocity after 1 s of unit drag: {v}");
}

#[test]
fn identical_scenes_are_deterministic() {
    let build = || {
        let mut solver = Solver::new(SolverConfig::default()).unwrap();
        solver.add_body(ground()).unwrap();
        let ball = solver
            .add_body(
                Body::with_shape_mass(
                    Pose::from_position(Point3::new(0.0, 0.0, 2.0)),
                    Shape::sphere(0.5),
                    1.0,
                )
                .with_velocity(Vector3::new(0.5, 0.2, 0.0), Vector3::new(0.0, 0.0, 1.0)),
            )
            .unwrap();
        (solver, ball)
    };

    let (mut a, ha) = build();
    let (mut b, hb) = build();
    for _ in 0..120 {
        a.step(DT).unwrap();
        b.step(DT).unwrap();
    }

    assert_eq!(a.body(ha).unwrap().pose, b.body(hb).unwrap().pose);
}

// =============================================================================
// Ropes and particles
// =============================================================================

#[test]
fn free_particle_pair_splits_length_error() {
    let mut solver = Solver::new(SolverConfig::default().substeps(1).zero_gravity()).unwrap();
    let particles = vec![
        Particle::new(Point3::origin(), 1.0),
        Particle::new(Point3::new(2.0, 0.0, 0.0), 1.0),
    ];
    let actor = Actor::from_particles(particles, vec![DistanceConstraint::new(0, 1, 1.0)]).unwrap();
    let h = solver.add_actor(actor).unwrap();

    solver.step(DT).unwrap();

    let p = solver.actor(h).unwrap().particles();
    assert_relative_eq!(p[0].position.x, 0.5, epsilon = 1e-12);
    assert_relative_eq!(p[1].position.x, 1.5, epsilon = 1e-12);
}

fn vertical_rope(config: SolverConfig) -> (Solver, sim_xpbd::ActorHandle) {
    let mut solver = Solver::new(config).unwrap();
    let top = solver
        .add_body(Body::fixed(Pose::from_position(Point3::new(0.0, 0.0, 1.0))))
        .unwrap();
    let bottom = solver.add_body(Body::fixed(Pose::identity())).unwrap();
    let rope = solver
        .add_rope(
            ActorAnchors::between(Some(top), Some(bottom)),
            0.25,
            Vector3::zeros(),
        )
        .unwrap();
    (solver, rope)
}

#[test]
fn rope_between_static_bodies_is_evenly_spaced() {
    for substeps in [1, 4, 16] {
        let (mut solver, rope) = vertical_rope(SolverConfig::default().substeps(substeps).zero_gravity());
        for _ in 0..10 {
            solver.step(DT).unwrap();
        }

        let z: Vec<f64> = solver
            .actor(rope)
            .unwrap()
            .particles()
            .iter()
            .map(|p| p.position.z)
            .collect();
        assert_eq!(z.len(), 5);
        for (i, z) in z.iter().enumerate() {
            assert_relative_eq!(*z, 0.25 * i as f64, epsilon = 1e-12);
        }
    }
}

#[test]
fn rope_under_gravity_stays_near_even_spacing() {
    let (mut solver, rope) =
        vertical_rope(SolverConfig::default().substeps(8).iterations(20, 1));
    for _ in 0..60 {
        solver.step(DT).unwrap();
    }

    for (i, p) in solver.actor(rope).unwrap().particles().iter().enumerate() {
        assert_relative_eq!(p.position.z, 0.25 * i as f64, epsilon = 1e-2);
        assert_relative_eq!(p.position.x, 0.0, epsilon = 1e-12);
    }
}

#[test]
fn rope_holds_a_hanging_body() {
    let mut solver = Solver::new(SolverConfig::default().iterations(10, 1)).unwrap();
    let weight = solver.add_body(point_mass_at(Point3::origin())).unwrap();
    let rope = solver
        .add_rope(
            ActorAnchors::between(None, Some(weight))
                .with_anchor_local(Pose::from_position(Point3::new(0.0, 0.0, 1.0))),
            0.1,
            Vector3::zeros(),
        )
        .unwrap();

    for _ in 0..120 {
        solver.step(DT).unwrap();
    }

    // The rope stretches a little under load but never lets go
    let z = solver.body(weight).unwrap().pose.position.z;
    assert!(z < 0.05 && z > -0.5, "hanging body at z = {z}");
    let first = solver.actor(rope).unwrap().particles()[0].position;
    assert_relative_eq!(first.z, z, epsilon = 0.05);
}

// =============================================================================
// Contacts
// =============================================================================

#[test]
fn sphere_comes_to_rest_on_ground() {
    let mut solver = Solver::new(SolverConfig::default()).unwrap();
    solver.add_body(ground()).unwrap();
    let ball = solver
        .add_body(Body::with_shape_mass(
            Pose::from_position(Point3::new(0.0, 0.0, 1.0)),
            Shape::sphere(0.5),
            1.0,
        ))
        .unwrap();

    let mut touched = false;
    for _ in 0..120 {
        touched |= solver.step(DT).unwrap().contacts > 0;
    }

    assert!(touched);
    let body = solver.body(ball).unwrap();
    assert_relative_eq!(body.pose.position.z, 0.5, epsilon = 1e-3);
    assert!(body.velocity.norm() < 0.1);
    assert!(solver.contacts().is_empty());
}

#[test]
fn friction_slows_a_sliding_sphere() {
    let slide = |friction: f64| {
        let mut solver = Solver::new(SolverConfig::default().friction(friction)).unwrap();
        solver.add_body(ground()).unwrap();
        let ball = solver
            .add_body(
                Body::with_shape_mass(
                    Pose::from_position(Point3::new(0.0, 0.0, 0.5)),
                    Shape::sphere(0.5),
                    1.0,
                )
                .with_velocity(Vector3::new(2.0, 0.0, 0.0), Vector3::zeros()),
            )
            .unwrap();
        for _ in 0..60 {
            solver.step(DT).unwrap();
        }
        solver.body(ball).unwrap().velocity.x
    };

    let frictionless = slide(0.0);
    let rough = slide(0.5);

    assert_relative_eq!(frictionless, 2.0, epsilon = 1e-6);
    assert!(rough < 1.9 && rough > 0.0, "velocity with friction: {rough}");
}

#[test]
fn kinematic_body_is_not_pushed() {
    let mut solver = Solver::new(SolverConfig::default().zero_gravity()).unwrap();
    let wall = solver
        .add_body(
            Body::with_shape_mass(Pose::identity(), Shape::cuboid(Vector3::new(1.0, 1.0, 1.0)), 1.0)
                .kinematic(),
        )
        .unwrap();
    let ball = solver
        .add_body(Body::with_shape_mass(
            Pose::from_position(Point3::new(0.0, 0.0, 1.4)),
            Shape::sphere(0.5),
            1.0,
        ))
        .unwrap();

    solver.step(DT).unwrap();

    assert_eq!(solver.body(wall).unwrap().pose, Pose::identity());
    assert!(solver.body(ball).unwrap().pose.position.z >= 1.5 - 1e-3);
}

/// Narrow phase that never reports contact.
struct Ghost;

impl PenetrationQuery for Ghost {
    fn penetrate(&self, _: &Shape, _: &Pose, _: &Shape, _: &Pose) -> Option<Penetration> {
        None
    }
}

#[test]
fn custom_narrow_phase_is_used() {
    let mut solver = Solver::with_query(SolverConfig::default(), Ghost).unwrap();
    solver.add_body(ground()).unwrap();
    let ball = solver
        .add_body(Body::with_shape_mass(
            Pose::from_position(Point3::new(0.0, 0.0, 0.5)),
            Shape::sphere(0.5),
            1.0,
        ))
        .unwrap();

    for _ in 0..30 {
        assert_eq!(solver.step(DT).unwrap().contacts, 0);
    }
    assert!(solver.body(ball).unwrap().pose.position.z < 0.0);
}

// =============================================================================
// Joints
// =============================================================================

#[test]
fn kinematic_anchor_takes_no_share_of_the_correction() {
    let mut solver = Solver::new(SolverConfig::default().substeps(1).zero_gravity()).unwrap();
    let k = solver
        .add_body(Body::new(Pose::identity(), MassProperties::sphere(1.0, 0.5)).kinematic())
        .unwrap();
    let d = solver.add_body(point_mass_at(Point3::new(0.0, 0.0, 1.0))).unwrap();
    solver.connect(Some(k), Some(d), JointParams::spherical()).unwrap();

    solver.step(DT).unwrap();

    assert_eq!(solver.body(k).unwrap().pose.position, Point3::origin());
    assert_relative_eq!(
        solver.body(d).unwrap().pose.position,
        Point3::origin(),
        epsilon = 1e-12
    );
}

#[test]
fn distance_joint_catches_a_falling_body() {
    let mut solver = Solver::new(SolverConfig::default()).unwrap();
    let anchor = Point3::new(0.0, 0.0, 2.0);
    let bob = solver.add_body(point_mass_at(Point3::new(0.0, 0.0, 1.5))).unwrap();
    solver
        .connect(
            None,
            Some(bob),
            JointParams::distance(1.0).with_anchor_local(Pose::from_position(anchor)),
        )
        .unwrap();

    for _ in 0..60 {
        solver.step(DT).unwrap();
    }

    let distance = (solver.body(bob).unwrap().pose.position - anchor).norm();
    assert!(distance <= 1.0 + 1e-9, "distance {distance}");
    assert!(distance > 0.99, "distance {distance}");
}

#[test]
fn spherical_pendulum_keeps_its_attachment() {
    let mut solver = Solver::new(SolverConfig::default().substeps(8)).unwrap();
    let pivot = Point3::new(0.0, 0.0, 2.0);
    let bob = solver
        .add_body(
            Body::new(
                Pose::from_position(Point3::new(0.0, 0.0, 1.0)),
                MassProperties::sphere(1.0, 0.2),
            )
            .with_velocity(Vector3::new(1.0, 0.0, 0.0), Vector3::zeros()),
        )
        .unwrap();
    let joint = solver
        .connect(
            None,
            Some(bob),
            JointParams::spherical()
                .with_anchor_local(Pose::from_position(pivot))
                .with_target_local(Pose::from_position(Point3::new(0.0, 0.0, 1.0))),
        )
        .unwrap();

    for _ in 0..60 {
        solver.step(DT).unwrap();
    }

    let body = solver.body(bob).unwrap();
    let attachment = body.pose.transform_point(&Point3::new(0.0, 0.0, 1.0));
    assert!((attachment - pivot).norm() < 1e-2);
    assert!(body.pose.position.x.abs() > 1e-3);

    let (anchor, target) = solver.joint(joint).unwrap().global_poses();
    assert_relative_eq!(anchor.position, pivot, epsilon = 1e-12);
    assert!((target.position - pivot).norm() < 1e-2);
}

#[test]
fn fixed_joint_holds_a_cantilever() {
    let mut solver = Solver::new(SolverConfig::default().substeps(8)).unwrap();
    let base = solver.add_body(Body::fixed(Pose::identity())).unwrap();
    let arm = solver
        .add_body(Body::new(
            Pose::from_position(Point3::new(1.0, 0.0, 0.0)),
            MassProperties::box_shape(1.0, Vector3::new(0.5, 0.1, 0.1)),
        ))
        .unwrap();
    solver
        .connect(
            Some(base),
            Some(arm),
            JointParams::fixed()
                .with_anchor_local(Pose::from_position(Point3::new(0.5, 0.0, 0.0)))
                .with_target_local(Pose::from_position(Point3::new(-0.5, 0.0, 0.0))),
        )
        .unwrap();

    for _ in 0..60 {
        solver.step(DT).unwrap();
    }

    let pose = solver.body(arm).unwrap().pose;
    assert_relative_eq!(pose.position, Point3::new(1.0, 0.0, 0.0), epsilon = 1e-2);
    assert!(pose.rotation.angle() < 1e-2);
}

// =============================================================================
// Registration errors
// =============================================================================

#[test]
fn stale_handle_does_not_alias_reused_slot() {
    let mut solver = Solver::new(SolverConfig::default()).unwrap();
    let old = solver.add_body(point_mass_at(Point3::origin())).unwrap();
    solver.remove_body(old).unwrap();
    let new = solver.add_body(point_mass_at(Point3::new(5.0, 0.0, 0.0))).unwrap();

    assert_ne!(old, new);
    assert!(solver.body(old).unwrap_err().is_disposed());
    assert_eq!(solver.body(new).unwrap().pose.position.x, 5.0);
}

#[test]
fn anchored_body_cannot_be_removed_before_its_rope() {
    let (mut solver, rope) = vertical_rope(SolverConfig::default());
    let top = solver.bodies().handles()[0];

    let err = solver.remove_body(top).unwrap_err();
    assert!(matches!(err, SimError::InUse { .. }));
    assert!(err.to_string().contains("actor"));

    solver.remove_actor(rope).unwrap();
    assert!(solver.remove_body(top).is_ok());
    assert!(solver.actor(rope).unwrap_err().is_disposed());
}

#[test]
fn invalid_registrations_fail_fast() {
    let mut solver = Solver::new(SolverConfig::default()).unwrap();

    let negative = Body::new(Pose::identity(), MassProperties::point_mass(-1.0));
    assert!(solver.add_body(negative).is_err());

    let h = solver.add_body(point_mass_at(Point3::origin())).unwrap();
    let err = solver
        .connect(None, Some(h), JointParams::hinge().with_compliance(-1.0))
        .unwrap_err();
    assert!(err.is_config_error());

    let err = solver
        .add_rope(ActorAnchors::between(None, Some(h)), -0.1, Vector3::zeros())
        .unwrap_err();
    assert!(err.is_config_error());

    assert!(solver.bodies().len() == 1);
    assert!(solver.joints().is_empty());
    assert!(solver.actors().is_empty());
}

#[test]
fn invalid_step_and_config_are_rejected() {
    assert!(Solver::new(SolverConfig::default().iterations(0, 1)).is_err());

    let mut solver = Solver::new(SolverConfig::default()).unwrap();
    assert!(matches!(solver.step(-DT), Err(SimError::InvalidTimestep(_))));
    assert!(matches!(solver.step(f64::INFINITY), Err(SimError::InvalidTimestep(_))));
}
