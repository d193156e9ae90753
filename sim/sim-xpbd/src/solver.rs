//! The solver: entity registration and the substep pipeline.
//!
//! Each outer step is split into `substeps` equal substeps. Every substep
//! walks the same fixed sequence of phases:
//!
//! ```text
//! BeginStep → ApplyForces → Integrate → ResolveCollisionsPre
//!   → SolveJointPositions → SolveActorConstraints → ResolveCollisionsPost
//!   → ClearContacts → EndStep → SolveJointVelocities
//! ```
//!
//! Later phases read what earlier ones wrote (collisions see the
//! integrated poses, velocities are derived only after every position
//! correction), so the order never changes and never loops back.

use nalgebra::Vector3;
use sim_types::{ActorHandle, BodyHandle, Handle, JointHandle, SimError, SolverConfig};
use tracing::{debug, debug_span, trace, warn};

use crate::actor::{Actor, ActorAnchors};
use crate::arena::Arena;
use crate::body::Body;
use crate::collision::CollisionSystem;
use crate::contact::{Contact, PenetrationQuery};
use crate::gjk_epa::GjkEpa;
use crate::joint::{Joint, JointParams};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One phase of a substep, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SubstepPhase {
    /// Snapshot poses and particle positions.
    BeginStep,
    /// Gravity and drag.
    ApplyForces,
    /// Advance poses and particles by their velocities.
    Integrate,
    /// First collision pass, on the integrated poses.
    ResolveCollisionsPre,
    /// Joint position constraints.
    SolveJointPositions,
    /// Rope and particle-chain constraints.
    SolveActorConstraints,
    /// Second collision pass, after the constraints moved things around.
    ResolveCollisionsPost,
    /// Forget this substep's contacts.
    ClearContacts,
    /// Derive velocities from the pose change.
    EndStep,
    /// Velocity-level joint damping.
    SolveJointVelocities,
}

impl SubstepPhase {
    /// Phase a substep starts with.
    pub const FIRST: Self = Self::BeginStep;

    /// The phase that follows this one, or `None` after the last.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::BeginStep => Some(Self::ApplyForces),
            Self::ApplyForces => Some(Self::Integrate),
            Self::Integrate => Some(Self::ResolveCollisionsPre),
            Self::ResolveCollisionsPre => Some(Self::SolveJointPositions),
            Self::SolveJointPositions => Some(Self::SolveActorConstraints),
            Self::SolveActorConstraints => Some(Self::ResolveCollisionsPost),
            Self::ResolveCollisionsPost => Some(Self::ClearContacts),
            Self::ClearContacts => Some(Self::EndStep),
            Self::EndStep => Some(Self::SolveJointVelocities),
            Self::SolveJointVelocities => None,
        }
    }

    /// All phases in execution order.
    pub fn sequence() -> impl Iterator<Item = Self> {
        std::iter::successors(Some(Self::FIRST), |phase| phase.next())
    }
}

/// Summary of one outer step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StepReport {
    /// Substeps executed.
    pub substeps: u32,
    /// Contacts resolved over all substeps and collision passes.
    pub contacts: usize,
}

/// XPBD solver owning every body, actor and joint.
///
/// # Example
///
/// ```
/// use nalgebra::Point3;
/// use sim_types::{MassProperties, Pose, SolverConfig};
/// use sim_xpbd::{Body, Solver};
///
/// let mut solver = Solver::new(SolverConfig::default()).unwrap();
/// let ball = solver
///     .add_body(Body::new(
///         Pose::from_position(Point3::new(0.0, 0.0, 10.0)),
///         MassProperties::sphere(1.0, 0.5),
///     ))
///     .unwrap();
///
/// solver.step(1.0 / 60.0).unwrap();
/// assert!(solver.body(ball).unwrap().pose.position.z < 10.0);
/// ```
#[derive(Debug, Clone)]
pub struct Solver<Q = GjkEpa> {
    config: SolverConfig,
    bodies: Arena<BodyHandle, Body>,
    actors: Arena<ActorHandle, Actor>,
    joints: Arena<JointHandle, Joint>,
    collisions: CollisionSystem<Q>,
    time: f64,
}

impl Solver<GjkEpa> {
    /// Create a solver with the built-in narrow phase.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn new(config: SolverConfig) -> sim_types::Result<Self> {
        Self::with_query(config, GjkEpa)
    }
}

impl<Q: PenetrationQuery> Solver<Q> {
    /// Create a solver around a custom narrow phase.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn with_query(config: SolverConfig, query: Q) -> sim_types::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            bodies: Arena::new(),
            actors: Arena::new(),
            joints: Arena::new(),
            collisions: CollisionSystem::with_query(query),
            time: 0.0,
        })
    }

    /// Solver configuration.
    #[must_use]
    pub const fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Simulated time (seconds) accumulated over successful steps.
    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Register a body.
    ///
    /// # Errors
    ///
    /// Returns the body's validation error.
    pub fn add_body(&mut self, body: Body) -> sim_types::Result<BodyHandle> {
        body.validate()?;
        let handle = self.bodies.insert(body);
        debug!(%handle, "registered body");
        Ok(handle)
    }

    /// Unregister a body and hand it back.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` for a stale handle and `InUse` while a joint or
    /// actor anchor still references the body.
    pub fn remove_body(&mut self, handle: BodyHandle) -> sim_types::Result<Body> {
        if !self.bodies.contains(handle) {
            return Err(SimError::disposed(BodyHandle::KIND, handle));
        }

        if let Some((joint, _)) = self
            .joints
            .iter()
            .find(|(_, j)| j.bodies().any(|b| b == handle))
        {
            return Err(SimError::in_use(
                BodyHandle::KIND,
                handle,
                format!("{} {joint}", JointHandle::KIND),
            ));
        }

        if let Some((actor, _)) = self.actors.iter().find(|(_, a)| {
            a.anchors()
                .is_some_and(|anchors| anchors.bodies().any(|b| b == handle))
        }) {
            return Err(SimError::in_use(
                BodyHandle::KIND,
                handle,
                format!("{} {actor}", ActorHandle::KIND),
            ));
        }

        let body = self
            .bodies
            .remove(handle)
            .ok_or_else(|| SimError::disposed(BodyHandle::KIND, handle))?;
        debug!(%handle, "unregistered body");
        Ok(body)
    }

    /// Register an actor.
    ///
    /// # Errors
    ///
    /// Returns the actor's validation error, or `Disposed` if an anchor body
    /// is not registered.
    pub fn add_actor(&mut self, actor: Actor) -> sim_types::Result<ActorHandle> {
        actor.validate()?;
        if let Some(anchors) = actor.anchors() {
            self.check_bodies(anchors.bodies())?;
        }

        let handle = self.actors.insert(actor);
        debug!(%handle, "registered actor");
        Ok(handle)
    }

    /// Build a rope between two attachment frames and register it.
    ///
    /// # Errors
    ///
    /// See [`Actor::rope_between_anchors`].
    pub fn add_rope(
        &mut self,
        anchors: ActorAnchors,
        span: f64,
        drag: Vector3<f64>,
    ) -> sim_types::Result<ActorHandle> {
        let actor = Actor::rope_between_anchors(anchors, span, drag, &self.bodies)?;
        self.add_actor(actor)
    }

    /// Unregister an actor and hand it back.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` for a stale handle.
    pub fn remove_actor(&mut self, handle: ActorHandle) -> sim_types::Result<Actor> {
        let actor = self
            .actors
            .remove(handle)
            .ok_or_else(|| SimError::disposed(ActorHandle::KIND, handle))?;
        debug!(%handle, "unregistered actor");
        Ok(actor)
    }

    /// Register a joint.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` if a referenced body is not registered.
    pub fn add_joint(&mut self, mut joint: Joint) -> sim_types::Result<JointHandle> {
        self.check_bodies(joint.bodies())?;
        joint.recalculate_global_poses(&self.bodies)?;

        let handle = self.joints.insert(joint);
        debug!(%handle, "registered joint");
        Ok(handle)
    }

    /// Create and register a joint between `body0` and `body1`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for invalid parameters and `Disposed` if a
    /// referenced body is not registered.
    pub fn connect(
        &mut self,
        body0: Option<BodyHandle>,
        body1: Option<BodyHandle>,
        params: JointParams,
    ) -> sim_types::Result<JointHandle> {
        self.add_joint(Joint::new(body0, body1, params)?)
    }

    /// Unregister a joint and hand it back.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` for a stale handle.
    pub fn remove_joint(&mut self, handle: JointHandle) -> sim_types::Result<Joint> {
        let joint = self
            .joints
            .remove(handle)
            .ok_or_else(|| SimError::disposed(JointHandle::KIND, handle))?;
        debug!(%handle, "unregistered joint");
        Ok(joint)
    }

    fn check_bodies(&self, handles: impl Iterator<Item = BodyHandle>) -> sim_types::Result<()> {
        for handle in handles {
            if !self.bodies.contains(handle) {
                return Err(SimError::disposed(BodyHandle::KIND, handle));
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Access
    // ---------------------------------------------------------------------

    /// Look up a body.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` for a stale handle.
    pub fn body(&self, handle: BodyHandle) -> sim_types::Result<&Body> {
        self.bodies
            .get(handle)
            .ok_or_else(|| SimError::disposed(BodyHandle::KIND, handle))
    }

    /// Look up a body mutably, e.g. to drive a kinematic body.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` for a stale handle.
    pub fn body_mut(&mut self, handle: BodyHandle) -> sim_types::Result<&mut Body> {
        self.bodies
            .get_mut(handle)
            .ok_or_else(|| SimError::disposed(BodyHandle::KIND, handle))
    }

    /// Look up an actor.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` for a stale handle.
    pub fn actor(&self, handle: ActorHandle) -> sim_types::Result<&Actor> {
        self.actors
            .get(handle)
            .ok_or_else(|| SimError::disposed(ActorHandle::KIND, handle))
    }

    /// Look up an actor mutably, e.g. to move pinned particles.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` for a stale handle.
    pub fn actor_mut(&mut self, handle: ActorHandle) -> sim_types::Result<&mut Actor> {
        self.actors
            .get_mut(handle)
            .ok_or_else(|| SimError::disposed(ActorHandle::KIND, handle))
    }

    /// Look up a joint.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` for a stale handle.
    pub fn joint(&self, handle: JointHandle) -> sim_types::Result<&Joint> {
        self.joints
            .get(handle)
            .ok_or_else(|| SimError::disposed(JointHandle::KIND, handle))
    }

    /// All registered bodies.
    #[must_use]
    pub const fn bodies(&self) -> &Arena<BodyHandle, Body> {
        &self.bodies
    }

    /// All registered actors.
    #[must_use]
    pub const fn actors(&self) -> &Arena<ActorHandle, Actor> {
        &self.actors
    }

    /// All registered joints.
    #[must_use]
    pub const fn joints(&self) -> &Arena<JointHandle, Joint> {
        &self.joints
    }

    /// Contacts of the substep in progress; empty between steps.
    #[must_use]
    pub fn contacts(&self) -> &[Contact] {
        self.collisions.contacts()
    }

    // ---------------------------------------------------------------------
    // Stepping
    // ---------------------------------------------------------------------

    /// Advance the simulation by `dt` seconds.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTimestep` for a non-positive or non-finite `dt`, and
    /// `Diverged` if any pose or particle position became non-finite. A
    /// diverged solver keeps its (broken) state for inspection.
    pub fn step(&mut self, dt: f64) -> sim_types::Result<StepReport> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(SimError::InvalidTimestep(dt));
        }

        let span = debug_span!("xpbd_step", dt, substeps = self.config.substeps);
        let _enter = span.enter();

        let h = self.config.substep_dt(dt);
        let mut report = StepReport::default();

        for substep in 0..self.config.substeps {
            for phase in SubstepPhase::sequence() {
                trace!(substep, ?phase, "substep phase");
                report.contacts += self.run_phase(phase, h)?;
            }
            report.substeps += 1;
        }

        self.check_finite()?;
        self.time += dt;
        Ok(report)
    }

    /// Run one phase; returns the contacts it resolved.
    fn run_phase(&mut self, phase: SubstepPhase, h: f64) -> sim_types::Result<usize> {
        match phase {
            SubstepPhase::BeginStep => {
                self.bodies.values_mut().for_each(Body::begin_step);
                self.actors.values_mut().for_each(Actor::begin_step);
            }
            SubstepPhase::ApplyForces => self.apply_forces(h),
            SubstepPhase::Integrate => {
                for body in self.bodies.values_mut() {
                    body.integrate(h);
                }
                for actor in self.actors.values_mut() {
                    actor.integrate(h);
                }
            }
            SubstepPhase::ResolveCollisionsPre | SubstepPhase::ResolveCollisionsPost => {
                let mut contacts = 0;
                for _ in 0..self.config.collision_iterations {
                    contacts +=
                        self.collisions
                            .solve(&mut self.bodies, h, self.config.default_friction);
                }
                return Ok(contacts);
            }
            SubstepPhase::SolveJointPositions => {
                for _ in 0..self.config.position_iterations {
                    for joint in self.joints.values_mut() {
                        joint.solve_position(h, &mut self.bodies)?;
                    }
                }
            }
            SubstepPhase::SolveActorConstraints => {
                for _ in 0..self.config.position_iterations {
                    for actor in self.actors.values_mut() {
                        actor.solve_constraints(h, &mut self.bodies)?;
                    }
                }
            }
            SubstepPhase::ClearContacts => self.collisions.clear_contacts(),
            SubstepPhase::EndStep => {
                for body in self.bodies.values_mut() {
                    body.end_step(h);
                }
                for actor in self.actors.values_mut() {
                    actor.end_step(h);
                }
            }
            SubstepPhase::SolveJointVelocities => {
                for joint in self.joints.values_mut() {
                    joint.solve_velocity(h, &mut self.bodies)?;
                }
            }
        }
        Ok(0)
    }

    fn apply_forces(&mut self, h: f64) {
        let gravity = self.config.gravity.acceleration;

        for body in self.bodies.values_mut() {
            if body.receives_gravity() {
                body.apply_acceleration(h, &gravity);
            }
            if !body.is_kinematic() {
                body.apply_drag(h);
            }
        }

        for actor in self.actors.values_mut() {
            actor.apply_acceleration(h, &gravity);
            actor.apply_drag(h);
        }
    }

    fn check_finite(&self) -> sim_types::Result<()> {
        if let Some((handle, _)) = self.bodies.iter().find(|(_, b)| !b.pose.is_finite()) {
            warn!(%handle, "body pose diverged");
            return Err(SimError::diverged(format!(
                "{} {handle} has a non-finite pose",
                BodyHandle::KIND
            )));
        }

        if let Some((handle, _)) = self.actors.iter().find(|(_, a)| !a.is_finite()) {
            warn!(%handle, "actor diverged");
            return Err(SimError::diverged(format!(
                "{} {handle} has a non-finite particle",
                ActorHandle::KIND
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;
    use sim_types::{MassProperties, Pose};

    use crate::particle::{DistanceConstraint, Particle};
    use crate::shape::Shape;

    #[test]
    fn test_phase_sequence_is_fixed() {
        let phases: Vec<_> = SubstepPhase::sequence().collect();
        assert_eq!(phases.len(), 10);
        assert_eq!(phases[0], SubstepPhase::BeginStep);
        assert_eq!(phases[3], SubstepPhase::ResolveCollisionsPre);
        assert_eq!(phases[7], SubstepPhase::ClearContacts);
        assert_eq!(*phases.last().unwrap(), SubstepPhase::SolveJointVelocities);
        assert_eq!(SubstepPhase::SolveJointVelocities.next(), None);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let err = Solver::new(SolverConfig::default().substeps(0)).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_step_rejects_bad_timestep() {
        let mut solver = Solver::new(SolverConfig::default()).unwrap();
        assert!(matches!(solver.step(0.0), Err(SimError::InvalidTimestep(_))));
        assert!(matches!(solver.step(f64::NAN), Err(SimError::InvalidTimestep(_))));
        assert_eq!(solver.time(), 0.0);
    }

    #[test]
    fn test_step_report_counts_substeps() {
        let mut solver = Solver::new(SolverConfig::default().substeps(3)).unwrap();
        let report = solver.step(0.01).unwrap();
        assert_eq!(report.substeps, 3);
        assert_eq!(report.contacts, 0);
        assert_relative_eq!(solver.time(), 0.01);
    }

    #[test]
    fn test_static_body_stays_put() {
        let mut solver = Solver::new(SolverConfig::default()).unwrap();
        let h = solver
            .add_body(Body::fixed(Pose::from_position(Point3::new(1.0, 2.0, 3.0))))
            .unwrap();

        solver.step(0.1).unwrap();

        let body = solver.body(h).unwrap();
        assert_eq!(body.pose.position, Point3::new(1.0, 2.0, 3.0));
        assert!(body.is_asleep());
    }

    #[test]
    fn test_kinematic_body_ignores_gravity() {
        let mut solver = Solver::new(SolverConfig::default()).unwrap();
        let h = solver
            .add_body(
                Body::new(Pose::identity(), MassProperties::sphere(1.0, 0.5))
                    .kinematic()
                    .with_velocity(Vector3::new(1.0, 0.0, 0.0), Vector3::zeros()),
            )
            .unwrap();

        solver.step(0.1).unwrap();

        let body = solver.body(h).unwrap();
        assert_relative_eq!(body.pose.position.x, 0.1, epsilon = 1e-12);
        assert_eq!(body.pose.position.z, 0.0);
    }

    #[test]
    fn test_remove_body_then_lookup_is_disposed() {
        let mut solver = Solver::new(SolverConfig::default()).unwrap();
        let h = solver.add_body(Body::fixed(Pose::identity())).unwrap();

        solver.remove_body(h).unwrap();

        assert!(solver.body(h).unwrap_err().is_disposed());
        assert!(solver.remove_body(h).unwrap_err().is_disposed());
    }

    #[test]
    fn test_body_in_use_cannot_be_removed() {
        let mut solver = Solver::new(SolverConfig::default()).unwrap();
        let h = solver.add_body(Body::fixed(Pose::identity())).unwrap();
        let j = solver.connect(None, Some(h), JointParams::fixed()).unwrap();

        let err = solver.remove_body(h).unwrap_err();
        assert!(matches!(err, SimError::InUse { .. }));

        solver.remove_joint(j).unwrap();
        assert!(solver.remove_body(h).is_ok());
    }

    #[test]
    fn test_joint_on_disposed_body_is_rejected() {
        let mut solver = Solver::new(SolverConfig::default()).unwrap();
        let h = solver.add_body(Body::fixed(Pose::identity())).unwrap();
        solver.remove_body(h).unwrap();

        let err = solver.connect(None, Some(h), JointParams::fixed()).unwrap_err();
        assert!(err.is_disposed());
    }

    /// Narrow phase that reports the same shallow overlap for every pair.
    struct Overlapping;

    impl PenetrationQuery for Overlapping {
        fn penetrate(
            &self,
            _: &Shape,
            _: &Pose,
            _: &Shape,
            _: &Pose,
        ) -> Option<crate::contact::Penetration> {
            Some(crate::contact::Penetration {
                point: Point3::origin(),
                normal: Vector3::z(),
                depth: 0.01,
            })
        }
    }

    fn contacts_per_step(collision_iterations: u32) -> usize {
        let config = SolverConfig::default()
            .substeps(1)
            .iterations(1, collision_iterations)
            .zero_gravity();
        let mut solver = Solver::with_query(config, Overlapping).unwrap();
        for z in [0.0, 1.0] {
            solver
                .add_body(Body::with_shape_mass(
                    Pose::from_position(Point3::new(0.0, 0.0, z)),
                    Shape::sphere(0.5),
                    1.0,
                ))
                .unwrap();
        }
        solver.step(0.01).unwrap().contacts
    }

    #[test]
    fn test_collision_iterations_repeat_both_passes() {
        // One pair, resolved before and after the constraint phases
        assert_eq!(contacts_per_step(1), 2);
        assert_eq!(contacts_per_step(2), 4);
        assert_eq!(contacts_per_step(3), 6);
    }

    #[test]
    fn test_position_iterations_repeat_actor_phase() {
        let run = |position_iterations: u32| {
            let config = SolverConfig::default()
                .substeps(1)
                .iterations(position_iterations, 1)
                .zero_gravity();
            let mut solver = Solver::new(config).unwrap();
            let particles = vec![
                Particle::new(Point3::origin(), 1.0),
                Particle::new(Point3::new(2.0, 0.0, 0.0), 1.0),
            ];
            let constraint = DistanceConstraint::new(0, 1, 1.0).with_compliance(2.0e-4);
            let h = solver
                .add_actor(Actor::from_particles(particles, vec![constraint]).unwrap())
                .unwrap();
            solver.step(0.01).unwrap();
            solver.actor(h).unwrap().particles()[0].position.x
        };

        // α / h² = 2: the first pass closes a quarter of the error, the
        // second a quarter of what is left
        assert_relative_eq!(run(1), 0.25, epsilon = 1e-12);
        assert_relative_eq!(run(2), 0.375, epsilon = 1e-12);
    }

    #[test]
    fn test_divergence_is_reported() {
        let mut solver = Solver::new(SolverConfig::default().zero_gravity()).unwrap();
        let h = solver
            .add_body(Body::new(Pose::identity(), MassProperties::point_mass(1.0)))
            .unwrap();
        solver.body_mut(h).unwrap().velocity = Vector3::new(f64::INFINITY, 0.0, 0.0);

        let err = solver.step(0.01).unwrap_err();
        assert!(err.is_diverged());
    }
}
