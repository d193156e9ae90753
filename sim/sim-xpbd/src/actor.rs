//! Particle chains (ropes), optionally hung between two bodies.
//!
//! An actor owns its particles outright. Bodies it is anchored to are only
//! referenced by handle and are moved exclusively through the same
//! generalized-mass split every other constraint uses.
//!
//! ```text
//!   target ●──○──○──○──○──● anchor
//!          p0             p(n-1)
//! ```

use nalgebra::{Point3, Vector3};
use sim_types::{BodyHandle, Pose, SimError};

use crate::arena::Arena;
use crate::body::{Body, attached_pose, movable};
use crate::particle::{DistanceConstraint, Particle};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Mass given to every particle of a freshly built rope.
pub const DEFAULT_PARTICLE_MASS: f64 = 1.0;

/// Slack used when deciding whether the last span particle already sits on
/// the rope end.
const SPAN_TOLERANCE: f64 = 1e-9;

/// Largest particle count [`Actor::rope`] will lay out.
pub const MAX_ROPE_PARTICLES: usize = 1 << 20;

/// Where the two ends of an anchored actor attach.
///
/// The first particle is tied to the target frame and the last particle to
/// the anchor frame. A `None` body fixes that frame in the world, with the
/// local pose read as global.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ActorAnchors {
    /// Body holding the last particle.
    pub anchor: Option<BodyHandle>,
    /// Attachment frame in the anchor body's local space.
    pub anchor_local: Pose,
    /// Body holding the first particle.
    pub target: Option<BodyHandle>,
    /// Attachment frame in the target body's local space.
    pub target_local: Pose,
}

impl ActorAnchors {
    /// Attach at both body origins.
    #[must_use]
    pub fn between(anchor: Option<BodyHandle>, target: Option<BodyHandle>) -> Self {
        Self {
            anchor,
            anchor_local: Pose::identity(),
            target,
            target_local: Pose::identity(),
        }
    }

    /// Set the local attachment frame on the anchor side.
    #[must_use]
    pub const fn with_anchor_local(mut self, pose: Pose) -> Self {
        self.anchor_local = pose;
        self
    }

    /// Set the local attachment frame on the target side.
    #[must_use]
    pub const fn with_target_local(mut self, pose: Pose) -> Self {
        self.target_local = pose;
        self
    }

    /// Bodies referenced by this container.
    pub fn bodies(&self) -> impl Iterator<Item = BodyHandle> {
        self.anchor.into_iter().chain(self.target)
    }

    /// Current world positions of the target and anchor frames.
    pub fn world_positions(
        &self,
        bodies: &Arena<BodyHandle, Body>,
    ) -> sim_types::Result<(Point3<f64>, Point3<f64>)> {
        let target = attached_pose(bodies, self.target, &self.target_local)?;
        let anchor = attached_pose(bodies, self.anchor, &self.anchor_local)?;
        Ok((target.position, anchor.position))
    }
}

/// A chain of particles held together by distance constraints.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Actor {
    particles: Vec<Particle>,
    constraints: Vec<DistanceConstraint>,
    anchors: Option<ActorAnchors>,
    drag: Vector3<f64>,
}

impl Actor {
    /// Lay out a free rope from `start` to `end`.
    ///
    /// Particles are placed every `span` along the segment with a final one
    /// exactly at `end`, giving `1 + ceil(length / span)` particles. Each
    /// consecutive pair gets a rigid constraint at its initial separation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a non-positive span, non-finite endpoints,
    /// negative drag, or a span so short the rope would need more than
    /// [`MAX_ROPE_PARTICLES`] particles.
    pub fn rope(
        start: Point3<f64>,
        end: Point3<f64>,
        span: f64,
        drag: Vector3<f64>,
    ) -> sim_types::Result<Self> {
        if !span.is_finite() || span <= 0.0 {
            return Err(SimError::invalid_config(format!(
                "rope span must be positive, got {span}"
            )));
        }
        if !start.coords.iter().chain(end.coords.iter()).all(|v| v.is_finite()) {
            return Err(SimError::invalid_config("rope endpoints must be finite"));
        }

        let offset = end - start;
        let length = offset.norm();
        let spans = (length / span - SPAN_TOLERANCE).ceil().max(0.0);
        if !spans.is_finite() || spans >= MAX_ROPE_PARTICLES as f64 {
            return Err(SimError::invalid_config(format!(
                "rope of length {length} with span {span} exceeds {MAX_ROPE_PARTICLES} particles"
            )));
        }
        let spans = spans as usize;
        let direction = if length > 0.0 {
            offset / length
        } else {
            Vector3::zeros()
        };

        let particles: Vec<Particle> = (0..spans)
            .map(|i| start + direction * (i as f64 * span))
            .chain(std::iter::once(end))
            .map(|p| Particle::new(p, DEFAULT_PARTICLE_MASS))
            .collect();

        let constraints = (1..particles.len())
            .map(|i| DistanceConstraint::from_particles(i - 1, i, &particles))
            .collect();

        let actor = Self::from_particles(particles, constraints)?.with_drag(drag);
        actor.validate()?;
        Ok(actor)
    }

    /// Lay out a rope from the target frame to the anchor frame and keep it
    /// tied to both.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` if either anchor body is not registered, and the
    /// errors of [`Actor::rope`].
    pub fn rope_between_anchors(
        anchors: ActorAnchors,
        span: f64,
        drag: Vector3<f64>,
        bodies: &Arena<BodyHandle, Body>,
    ) -> sim_types::Result<Self> {
        let (start, end) = anchors.world_positions(bodies)?;
        Ok(Self::rope(start, end, span, drag)?.with_anchors(anchors))
    }

    /// Build an actor from explicit particles and constraints.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty particle list, a constraint that
    /// indexes out of range or ties a particle to itself, or a negative rest
    /// length or compliance.
    pub fn from_particles(
        particles: Vec<Particle>,
        constraints: Vec<DistanceConstraint>,
    ) -> sim_types::Result<Self> {
        if particles.is_empty() {
            return Err(SimError::invalid_config("actor needs at least one particle"));
        }

        for (i, c) in constraints.iter().enumerate() {
            if c.index0 >= particles.len() || c.index1 >= particles.len() {
                return Err(SimError::invalid_config(format!(
                    "constraint {i} references particle {} of {}",
                    c.index0.max(c.index1),
                    particles.len()
                )));
            }
            if c.index0 == c.index1 {
                return Err(SimError::invalid_config(format!(
                    "constraint {i} ties particle {} to itself",
                    c.index0
                )));
            }
            if !c.rest_distance.is_finite() || c.rest_distance < 0.0 {
                return Err(SimError::invalid_config(format!(
                    "constraint {i} has invalid rest distance {}",
                    c.rest_distance
                )));
            }
            if !c.compliance.is_finite() || c.compliance < 0.0 {
                return Err(SimError::invalid_config(format!(
                    "constraint {i} has invalid compliance {}",
                    c.compliance
                )));
            }
        }

        Ok(Self {
            particles,
            constraints,
            anchors: None,
            drag: Vector3::zeros(),
        })
    }

    /// Tie the chain ends to bodies.
    #[must_use]
    pub fn with_anchors(mut self, anchors: ActorAnchors) -> Self {
        self.anchors = Some(anchors);
        self
    }

    /// Set the per-axis drag applied to every particle.
    #[must_use]
    pub fn with_drag(mut self, drag: Vector3<f64>) -> Self {
        self.drag = drag;
        self
    }

    /// Give every particle the same mass; `0` pins them all.
    #[must_use]
    pub fn with_particle_mass(mut self, mass: f64) -> Self {
        for p in &mut self.particles {
            p.set_mass(mass);
        }
        self
    }

    /// Pin one particle in place.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `index` is out of range.
    pub fn pin(&mut self, index: usize) -> sim_types::Result<()> {
        let count = self.particles.len();
        let particle = self.particles.get_mut(index).ok_or_else(|| {
            SimError::invalid_config(format!("cannot pin particle {index} of {count}"))
        })?;
        particle.set_mass(0.0);
        Ok(())
    }

    /// Validate parameters that the builders cannot check on their own.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for negative or non-finite drag.
    pub fn validate(&self) -> sim_types::Result<()> {
        if self.drag.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(SimError::invalid_config(
                "actor drag must be finite and non-negative",
            ));
        }
        if self
            .particles
            .iter()
            .any(|p| !p.inverse_mass().is_finite() || p.inverse_mass() < 0.0)
        {
            return Err(SimError::invalid_mass("particle mass must be non-negative"));
        }
        Ok(())
    }

    /// Particles in chain order.
    #[must_use]
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Mutable particles, for driving pinned points.
    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    /// Internal constraints in solve order.
    #[must_use]
    pub fn constraints(&self) -> &[DistanceConstraint] {
        &self.constraints
    }

    /// Anchor container, if the chain is tied to bodies.
    #[must_use]
    pub const fn anchors(&self) -> Option<&ActorAnchors> {
        self.anchors.as_ref()
    }

    /// Per-axis drag.
    #[must_use]
    pub const fn drag(&self) -> Vector3<f64> {
        self.drag
    }

    /// Check whether any particle has a non-finite position.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.particles
            .iter()
            .all(|p| p.position.coords.iter().all(|v| v.is_finite()))
    }

    /// Snapshot every particle position.
    pub fn begin_step(&mut self) {
        for p in &mut self.particles {
            p.begin_step();
        }
    }

    /// Accumulate a constant acceleration on all free particles.
    pub fn apply_acceleration(&mut self, dt: f64, acceleration: &Vector3<f64>) {
        for p in &mut self.particles {
            p.apply_acceleration(dt, acceleration);
        }
    }

    /// Apply the actor's drag to every particle.
    pub fn apply_drag(&mut self, dt: f64) {
        for p in &mut self.particles {
            p.apply_drag(dt, &self.drag);
        }
    }

    /// Advance every particle by its velocity.
    pub fn integrate(&mut self, dt: f64) {
        for p in &mut self.particles {
            p.integrate(dt);
        }
    }

    /// Derive particle velocities from the substep's displacement.
    pub fn end_step(&mut self, dt: f64) {
        for p in &mut self.particles {
            p.end_step(dt);
        }
    }

    /// One Gauss-Seidel pass over the chain, including the anchor links.
    ///
    /// Anchored chains solve the target link first, then the internal
    /// constraints, then the anchor link.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` if an anchor body is no longer registered.
    pub fn solve_constraints(
        &mut self,
        dt: f64,
        bodies: &mut Arena<BodyHandle, Body>,
    ) -> sim_types::Result<()> {
        let Some(anchors) = self.anchors else {
            self.solve_inner_constraints(dt);
            return Ok(());
        };

        let target = attached_pose(bodies, anchors.target, &anchors.target_local)?;
        if let Some(first) = self.particles.first_mut() {
            let body = movable(anchors.target.and_then(|h| bodies.get_mut(h)));
            solve_anchor_link(first, body, &target.position);
        }

        self.solve_inner_constraints(dt);

        let anchor = attached_pose(bodies, anchors.anchor, &anchors.anchor_local)?;
        if let Some(last) = self.particles.last_mut() {
            let body = movable(anchors.anchor.and_then(|h| bodies.get_mut(h)));
            solve_anchor_link(last, body, &anchor.position);
        }

        Ok(())
    }

    /// One Gauss-Seidel pass over the internal distance constraints.
    pub fn solve_inner_constraints(&mut self, dt: f64) {
        for c in &self.constraints {
            c.solve(&mut self.particles, dt);
        }
    }
}

/// Pull a particle and its attachment point together.
///
/// The gap is split between the particle's inverse mass and the body's
/// generalized inverse mass at the attachment point. A `None` body is a
/// fixed world point.
fn solve_anchor_link(particle: &mut Particle, body: Option<&mut Body>, attach: &Point3<f64>) {
    let gap = particle.position - attach;
    let length = gap.norm();
    if length == 0.0 {
        return;
    }
    let normal = gap / length;

    let wb = body
        .as_ref()
        .map_or(0.0, |b| b.generalized_inverse_mass(&normal, Some(attach)));
    let wp = particle.inverse_mass();
    let w = wb + wp;
    if w == 0.0 {
        return;
    }

    let impulse = normal * (length / w);
    if let Some(body) = body {
        body.apply_correction(&impulse, Some(attach), false);
    }
    particle.position -= impulse * wp;
}
