//! Point masses and the distance constraints that chain them together.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A point mass owned by an actor.
///
/// Like bodies, particles start asleep and take a half-step on their first
/// accelerated substep.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Particle {
    /// Current position.
    pub position: Point3<f64>,
    /// Position at the start of the current substep.
    pub previous_position: Point3<f64>,
    /// Velocity (m/s).
    pub velocity: Vector3<f64>,
    inverse_mass: f64,
    asleep: bool,
}

impl Particle {
    /// Create a particle; a mass of `0` (or infinity) pins it in place.
    #[must_use]
    pub fn new(position: Point3<f64>, mass: f64) -> Self {
        let inverse_mass = if mass == 0.0 || mass.is_infinite() {
            0.0
        } else {
            1.0 / mass
        };

        Self {
            position,
            previous_position: position,
            velocity: Vector3::zeros(),
            inverse_mass,
            asleep: true,
        }
    }

    /// Create a pinned particle.
    #[must_use]
    pub fn pinned(position: Point3<f64>) -> Self {
        Self::new(position, 0.0)
    }

    /// Inverse mass; `0` when pinned.
    #[must_use]
    pub const fn inverse_mass(&self) -> f64 {
        self.inverse_mass
    }

    /// Change the mass; `0` pins the particle.
    pub fn set_mass(&mut self, mass: f64) {
        *self = Self {
            inverse_mass: Self::new(self.position, mass).inverse_mass,
            ..*self
        };
    }

    /// Check whether the particle is pinned.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.inverse_mass == 0.0
    }

    /// Whether the particle came to rest at the last substep.
    #[must_use]
    pub const fn is_asleep(&self) -> bool {
        self.asleep
    }

    /// Snapshot the position before integration.
    pub fn begin_step(&mut self) {
        self.previous_position = self.position;
    }

    /// Accumulate a constant acceleration; pinned particles ignore it.
    pub fn apply_acceleration(&mut self, dt: f64, acceleration: &Vector3<f64>) {
        if self.is_pinned() {
            return;
        }
        let dt = if self.asleep { 0.5 * dt } else { dt };
        self.velocity += acceleration * dt;
    }

    /// Linear drag: `v -= m⁻¹ h (v ⊙ drag)`.
    pub fn apply_drag(&mut self, dt: f64, drag: &Vector3<f64>) {
        let d = self.velocity.component_mul(drag);
        self.velocity -= d * (dt * self.inverse_mass);
    }

    /// Advance the position by the current velocity.
    pub fn integrate(&mut self, dt: f64) {
        self.position += self.velocity * dt;
    }

    /// Derive the velocity from the position change; a bit-identical
    /// position puts the particle to sleep.
    pub fn end_step(&mut self, dt: f64) {
        self.asleep = self.position == self.previous_position;
        self.velocity = if self.asleep {
            Vector3::zeros()
        } else {
            (self.position - self.previous_position) / dt
        };
    }
}

/// Distance constraint between two particles of the same actor.
///
/// Solved with the XPBD update; with zero compliance each particle moves by
/// its inverse-mass share of the length error.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DistanceConstraint {
    /// Index of the first particle.
    pub index0: usize,
    /// Index of the second particle.
    pub index1: usize,
    /// Rest length.
    pub rest_distance: f64,
    /// Compliance (inverse stiffness, 0 = rigid).
    pub compliance: f64,
}

impl DistanceConstraint {
    /// Create a rigid distance constraint.
    #[must_use]
    pub const fn new(index0: usize, index1: usize, rest_distance: f64) -> Self {
        Self {
            index0,
            index1,
            rest_distance,
            compliance: 0.0,
        }
    }

    /// Create a rigid constraint whose rest length is the current separation.
    #[must_use]
    pub fn from_particles(index0: usize, index1: usize, particles: &[Particle]) -> Self {
        let rest = (particles[index1].position - particles[index0].position).norm();
        Self::new(index0, index1, rest)
    }

    /// Set the compliance.
    #[must_use]
    pub const fn with_compliance(mut self, compliance: f64) -> Self {
        self.compliance = compliance;
        self
    }

    /// Constraint value `|x1 - x0| - L`.
    #[must_use]
    pub fn evaluate(&self, particles: &[Particle]) -> f64 {
        (particles[self.index1].position - particles[self.index0].position).norm()
            - self.rest_distance
    }

    /// Project both particles toward the rest length.
    ///
    /// Coincident particles and pairs of pinned particles are left alone.
    pub fn solve(&self, particles: &mut [Particle], dt: f64) {
        let p0 = particles[self.index0];
        let p1 = particles[self.index1];

        let w = p0.inverse_mass + p1.inverse_mass;
        if w == 0.0 {
            return;
        }

        let direction = p1.position - p0.position;
        let length = direction.norm();
        if length == 0.0 {
            return;
        }

        let error = (length - self.rest_distance) / length;
        let scale = error / (w + self.compliance / (dt * dt));

        particles[self.index0].position += direction * (p0.inverse_mass * scale);
        particles[self.index1].position -= direction * (p1.inverse_mass * scale);
    }
}
