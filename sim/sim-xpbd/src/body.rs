//! Rigid bodies and the generalized-mass correction primitives.
//!
//! Every constraint in the solver, whether joint, contact, rope anchor or
//! angular limit, reduces to [`apply_body_pair_correction`]: given a
//! correction vector and optional contact points on each side, it splits the
//! correction by the generalized inverse masses of the two bodies.
//!
//! ```text
//!   w_i = m_i⁻¹ + (r_i × n)ᵀ I_i⁻¹ (r_i × n)      (with a point)
//!   w_i =         nᵀ I_i⁻¹ n                       (pure rotation)
//!
//!   λ   = -|c| / (w_0 + w_1 + α / h²)
//!   Δ_0 = -λ n,   Δ_1 = +λ n
//! ```
//!
//! A `None` side is infinitely heavy. Callers substitute `None` for
//! kinematic bodies.

use nalgebra::{Point3, Quaternion, Unit, UnitQuaternion, Vector3};
use sim_types::{BodyHandle, Handle, MassProperties, Pose, SimError};

use crate::arena::Arena;
use crate::contact::tangential_split;
use crate::shape::Shape;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest rotation (radians) a single correction or integration step may
/// apply to a body.
pub const MAX_ROTATION_PER_SUBSTEP: f64 = 0.5;

/// A rigid body.
///
/// Bodies start asleep: the first integrated substep after creation (or
/// after coming to rest) uses a half-step velocity update, which makes the
/// position sequence match Verlet integration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Body {
    /// Current pose.
    pub pose: Pose,
    /// Pose at the start of the current substep.
    pub previous_pose: Pose,
    /// Linear velocity (m/s).
    pub velocity: Vector3<f64>,
    /// Angular velocity (rad/s), world frame.
    pub angular_velocity: Vector3<f64>,
    inverse_mass: f64,
    inverse_inertia: Vector3<f64>,
    drag: Vector3<f64>,
    friction: Option<f64>,
    kinematic: bool,
    shape: Option<Shape>,
    asleep: bool,
}

impl Body {
    /// Create a dynamic body at `pose`.
    #[must_use]
    pub fn new(pose: Pose, mass: MassProperties) -> Self {
        Self {
            pose,
            previous_pose: pose,
            velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            inverse_mass: mass.inverse_mass(),
            inverse_inertia: mass.inverse_inertia(),
            drag: Vector3::zeros(),
            friction: None,
            kinematic: false,
            shape: None,
            asleep: true,
        }
    }

    /// Create a dynamic body whose mass properties follow from its shape.
    #[must_use]
    pub fn with_shape_mass(pose: Pose, shape: Shape, mass: f64) -> Self {
        let props = shape.mass_properties(mass);
        Self::new(pose, props).with_shape(shape)
    }

    /// Create an immovable static body.
    #[must_use]
    pub fn fixed(pose: Pose) -> Self {
        Self::new(pose, MassProperties::infinite())
    }

    /// Mark the body as kinematic: driven only by its own velocity, never
    /// by gravity, drag or corrections.
    #[must_use]
    pub fn kinematic(mut self) -> Self {
        self.kinematic = true;
        self
    }

    /// Set the per-axis linear drag coefficient.
    #[must_use]
    pub fn with_drag(mut self, drag: Vector3<f64>) -> Self {
        self.drag = drag;
        self
    }

    /// Attach a collision shape.
    #[must_use]
    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Set the Coulomb friction coefficient used in contacts.
    #[must_use]
    pub fn with_friction(mut self, friction: f64) -> Self {
        self.friction = Some(friction);
        self
    }

    /// Set the initial linear and angular velocity.
    #[must_use]
    pub fn with_velocity(mut self, linear: Vector3<f64>, angular: Vector3<f64>) -> Self {
        self.velocity = linear;
        self.angular_velocity = angular;
        self
    }

    /// Inverse mass; `0` for infinite mass.
    #[must_use]
    pub const fn inverse_mass(&self) -> f64 {
        self.inverse_mass
    }

    /// Diagonal inverse inertia in the body frame.
    #[must_use]
    pub const fn inverse_inertia(&self) -> Vector3<f64> {
        self.inverse_inertia
    }

    /// Per-axis drag coefficient.
    #[must_use]
    pub const fn drag(&self) -> Vector3<f64> {
        self.drag
    }

    /// Friction coefficient, if set on this body.
    #[must_use]
    pub const fn friction(&self) -> Option<f64> {
        self.friction
    }

    /// Collision shape, if any.
    #[must_use]
    pub const fn shape(&self) -> Option<&Shape> {
        self.shape.as_ref()
    }

    /// Whether the body is kinematic.
    #[must_use]
    pub const fn is_kinematic(&self) -> bool {
        self.kinematic
    }

    /// Whether the body came to rest at the last substep.
    #[must_use]
    pub const fn is_asleep(&self) -> bool {
        self.asleep
    }

    /// Whether corrections can move this body at all.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        !self.kinematic && (self.inverse_mass > 0.0 || self.inverse_inertia != Vector3::zeros())
    }

    /// Whether gravity applies: dynamic with finite mass.
    #[must_use]
    pub fn receives_gravity(&self) -> bool {
        !self.kinematic && self.inverse_mass > 0.0
    }

    /// Validate the body before registration.
    pub fn validate(&self) -> sim_types::Result<()> {
        if !self.pose.is_finite() {
            return Err(SimError::invalid_config("body pose must be finite"));
        }

        if !self.inverse_mass.is_finite() || self.inverse_mass < 0.0 {
            return Err(SimError::invalid_mass("mass must be non-negative"));
        }

        if self.inverse_inertia.iter().any(|i| !i.is_finite() || *i < 0.0) {
            return Err(SimError::invalid_mass("inertia must be non-negative"));
        }

        if self.drag.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(SimError::invalid_config("drag must be finite and non-negative"));
        }

        if let Some(friction) = self.friction {
            if !friction.is_finite() || friction < 0.0 {
                return Err(SimError::invalid_config(
                    "friction must be finite and non-negative",
                ));
            }
        }

        if let Some(shape) = &self.shape {
            shape.validate()?;
        }

        Ok(())
    }

    /// Snapshot the pose before integration.
    pub fn begin_step(&mut self) {
        self.previous_pose = self.pose;
    }

    /// Accumulate a constant acceleration over `dt`.
    ///
    /// A sleeping body takes a half step, the Verlet start-up.
    pub fn apply_acceleration(&mut self, dt: f64, acceleration: &Vector3<f64>) {
        let dt = if self.asleep { 0.5 * dt } else { dt };
        self.velocity += acceleration * dt;
    }

    /// Linear drag: `v -= m⁻¹ h (v ⊙ drag)`.
    pub fn apply_drag(&mut self, dt: f64) {
        let drag = self.velocity.component_mul(&self.drag);
        self.velocity -= drag * (dt * self.inverse_mass);
    }

    /// Integrate the pose from the current velocities.
    pub fn integrate(&mut self, dt: f64) {
        self.pose = self.pose.translate(&(self.velocity * dt));
        let omega = self.angular_velocity;
        self.apply_rotation(&omega, dt);
    }

    /// Derive velocities from the pose change over the substep.
    ///
    /// A body whose pose is bit-identical to the previous one goes to sleep
    /// with zero velocity.
    pub fn end_step(&mut self, dt: f64) {
        self.asleep = self.pose == self.previous_pose;
        if self.asleep {
            self.velocity = Vector3::zeros();
            self.angular_velocity = Vector3::zeros();
            return;
        }

        self.velocity = (self.pose.position - self.previous_pose.position) / dt;

        let delta = (self.pose.rotation * self.previous_pose.rotation.inverse()).into_inner();
        let omega = delta.imag() * (2.0 / dt);
        self.angular_velocity = if delta.scalar() < 0.0 { -omega } else { omega };
    }

    /// Velocity of the material point currently at `point`.
    #[must_use]
    pub fn velocity_at(&self, point: &Point3<f64>) -> Vector3<f64> {
        self.velocity - (point - self.pose.position).cross(&self.angular_velocity)
    }

    /// Generalized inverse mass along `normal`, optionally at a world point.
    ///
    /// Without a point the result is purely rotational and the linear
    /// inverse mass is left out.
    #[must_use]
    pub fn generalized_inverse_mass(
        &self,
        normal: &Vector3<f64>,
        point: Option<&Point3<f64>>,
    ) -> f64 {
        let n = match point {
            Some(p) => (p - self.pose.position).cross(normal),
            None => *normal,
        };
        let n = self.pose.inverse_rotate(&n);
        let w = n.component_mul(&n).dot(&self.inverse_inertia);

        if point.is_some() {
            w + self.inverse_mass
        } else {
            w
        }
    }

    /// Apply a correction weighted by this body's inverse mass.
    ///
    /// With a point, the linear part moves the position (or velocity when
    /// `velocity_level`) and the lever arm yields the rotational part.
    /// Without one, `correction` is itself the rotational correction.
    pub fn apply_correction(
        &mut self,
        correction: &Vector3<f64>,
        point: Option<&Point3<f64>>,
        velocity_level: bool,
    ) {
        let rotation = match point {
            Some(p) => {
                let linear = correction * self.inverse_mass;
                if velocity_level {
                    self.velocity += linear;
                } else {
                    self.pose = self.pose.translate(&linear);
                }
                (p - self.pose.position).cross(correction)
            }
            None => *correction,
        };

        let local = self
            .pose
            .inverse_rotate(&rotation)
            .component_mul(&self.inverse_inertia);
        let world = self.pose.rotate(&local);

        if velocity_level {
            self.angular_velocity += world;
        } else {
            self.apply_rotation(&world, 1.0);
        }
    }

    /// First-order quaternion update `q += ½ (ω h) q`, renormalized.
    ///
    /// The step is clamped to [`MAX_ROTATION_PER_SUBSTEP`].
    pub fn apply_rotation(&mut self, rotation: &Vector3<f64>, scale: f64) {
        let phi = rotation.norm();
        if phi == 0.0 || scale == 0.0 {
            return;
        }

        let scale = if phi * scale > MAX_ROTATION_PER_SUBSTEP {
            MAX_ROTATION_PER_SUBSTEP / phi
        } else {
            scale
        };

        let q = *self.pose.rotation.quaternion();
        let dq = Quaternion::from_imag(rotation * scale) * q;
        self.pose.rotation = UnitQuaternion::new_normalize(q + dq * 0.5);
    }

    /// Scale a friction correction so it cannot reverse the tangential
    /// motion at `point`.
    ///
    /// A trial correction of magnitude `limit` along `direction` is applied
    /// at velocity level, the resulting tangential velocity change at the
    /// point is measured, and the velocities are restored. The returned
    /// limit is `limit * clamp(speed / change, 0, 1)`; zero when the trial
    /// produces no tangential change.
    pub fn friction_force_limit(
        &mut self,
        limit: f64,
        normal: &Vector3<f64>,
        point: &Point3<f64>,
        direction: &Vector3<f64>,
        speed: f64,
    ) -> f64 {
        let velocity = self.velocity;
        let angular_velocity = self.angular_velocity;
        let before = self.velocity_at(point);

        self.apply_correction(&(direction * limit), Some(point), true);
        let change = self.velocity_at(point) - before;

        self.velocity = velocity;
        self.angular_velocity = angular_velocity;

        let (_, actual) = tangential_split(&change, normal);
        if actual == 0.0 {
            0.0
        } else {
            limit * (speed / actual).clamp(0.0, 1.0)
        }
    }
}

/// World pose of a frame attached to `handle` at `local`.
///
/// A missing handle means the frame is fixed in the world and `local` is
/// already global.
pub(crate) fn attached_pose(
    bodies: &Arena<BodyHandle, Body>,
    handle: Option<BodyHandle>,
    local: &Pose,
) -> sim_types::Result<Pose> {
    match handle {
        Some(h) => bodies
            .get(h)
            .map(|body| body.pose.compose(local))
            .ok_or_else(|| SimError::disposed(BodyHandle::KIND, h)),
        None => Ok(*local),
    }
}

/// Drop kinematic bodies so corrections treat them as infinitely heavy.
pub(crate) fn movable(body: Option<&mut Body>) -> Option<&mut Body> {
    body.filter(|b| !b.is_kinematic())
}

/// The central XPBD projection between two (optional) bodies.
///
/// No-op for a zero correction or when both sides are immovable. Returns the
/// magnitude of the Lagrange multiplier, `|c| / (w₀ + w₁ + α/h²)`, which
/// contacts use as the normal force bound for friction.
#[allow(clippy::too_many_arguments)]
pub fn apply_body_pair_correction(
    body0: Option<&mut Body>,
    body1: Option<&mut Body>,
    correction: &Vector3<f64>,
    compliance: f64,
    dt: f64,
    point0: Option<&Point3<f64>>,
    point1: Option<&Point3<f64>>,
    velocity_level: bool,
) -> f64 {
    let length = correction.norm();
    if length == 0.0 {
        return 0.0;
    }

    let normal = correction / length;
    let w0 = body0
        .as_ref()
        .map_or(0.0, |b| b.generalized_inverse_mass(&normal, point0));
    let w1 = body1
        .as_ref()
        .map_or(0.0, |b| b.generalized_inverse_mass(&normal, point1));

    let w = w0 + w1;
    if w == 0.0 {
        return 0.0;
    }

    let lambda = -length / (w + compliance / (dt * dt));
    let impulse = normal * -lambda;

    if let Some(body) = body0 {
        body.apply_correction(&impulse, point0, velocity_level);
    }
    if let Some(body) = body1 {
        body.apply_correction(&-impulse, point1, velocity_level);
    }

    -lambda
}

/// Keep the signed angle from `a` to `b` about `axis` within
/// `[min_angle, max_angle]`.
///
/// The angle is `asin((a × b) · n)`, mirrored to `π - φ` when the vectors
/// point apart and wrapped into `[-π, π]`. Inside the range nothing happens.
/// Outside it, `a` is rotated to the nearest bound and the residual
/// `rotated_a × b`, clamped to `max_correction`, is projected as a pure
/// rotation. A degenerate axis is ignored.
#[allow(clippy::too_many_arguments)]
pub fn limit_angle(
    body0: Option<&mut Body>,
    body1: Option<&mut Body>,
    axis: &Vector3<f64>,
    a: &Vector3<f64>,
    b: &Vector3<f64>,
    min_angle: f64,
    max_angle: f64,
    compliance: f64,
    dt: f64,
    max_correction: f64,
) {
    use std::f64::consts::PI;

    let Some(axis) = Unit::try_new(*axis, 1e-12) else {
        return;
    };

    let mut phi = a.cross(b).dot(&axis).clamp(-1.0, 1.0).asin();
    if a.dot(b) < 0.0 {
        phi = PI - phi;
    }
    if phi > PI {
        phi -= 2.0 * PI;
    }
    if phi < -PI {
        phi += 2.0 * PI;
    }

    if (min_angle..=max_angle).contains(&phi) {
        return;
    }

    let phi = phi.clamp(min_angle, max_angle);
    let q = UnitQuaternion::from_axis_angle(&axis, phi);
    let mut omega = (q * a).cross(b);

    let magnitude = omega.norm();
    if magnitude > max_correction {
        omega *= max_correction / magnitude;
    }

    apply_body_pair_correction(body0, body1, &omega, compliance, dt, None, None, false);
}
