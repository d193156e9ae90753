//! Joints between two bodies (or a body and the world).
//!
//! Every joint relates two frames: the anchor frame on `body0` and the
//! target frame on `body1`. A missing body pins its frame in the world. The
//! primary axis of a frame is its local X axis and the secondary axis its
//! local Y axis.
//!
//! Position solve per joint kind:
//!
//! | Kind      | Orientation                          | Position        |
//! |-----------|--------------------------------------|-----------------|
//! | Fixed     | full alignment                       | coincident      |
//! | Hinge     | primary axes aligned, optional swing | coincident      |
//! | Spherical | optional swing and twist limits      | coincident      |
//! | Distance  | free                                 | at most `rest`  |

use std::f64::consts::PI;

use nalgebra::Vector3;
use sim_types::{BodyHandle, Handle, Pose, SimError};

use crate::arena::Arena;
use crate::body::{Body, apply_body_pair_correction, attached_pose, limit_angle, movable};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Joint variant.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JointKind {
    /// Rigid weld: orientations and positions fully aligned.
    Fixed,
    /// Rotation about the shared primary axis only.
    Hinge,
    /// Ball and socket.
    Spherical,
    /// One-sided rope: the anchors may not drift further apart than
    /// `rest_distance`.
    Distance {
        /// Maximum separation of the two anchor points.
        rest_distance: f64,
    },
}

/// Angular range with its own compliance.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AngleLimits {
    /// Lower bound (radians).
    pub min: f64,
    /// Upper bound (radians).
    pub max: f64,
    /// Compliance of the limit (0 = hard stop).
    pub compliance: f64,
}

impl Default for AngleLimits {
    fn default() -> Self {
        Self::new(-2.0 * PI, 2.0 * PI)
    }
}

impl AngleLimits {
    /// Create hard limits.
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            compliance: 0.0,
        }
    }

    /// Create hard limits `[-angle, angle]`.
    #[must_use]
    pub const fn symmetric(angle: f64) -> Self {
        Self::new(-angle, angle)
    }

    /// Set the compliance.
    #[must_use]
    pub const fn with_compliance(mut self, compliance: f64) -> Self {
        self.compliance = compliance;
        self
    }

    /// Check whether `angle` lies inside the range.
    #[must_use]
    pub fn contains(&self, angle: f64) -> bool {
        (self.min..=self.max).contains(&angle)
    }

    fn validate(&self, name: &str) -> sim_types::Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(SimError::invalid_config(format!(
                "{name} limits must be finite with min <= max, got [{}, {}]",
                self.min, self.max
            )));
        }
        if !self.compliance.is_finite() || self.compliance < 0.0 {
            return Err(SimError::invalid_config(format!(
                "{name} limit compliance must be non-negative"
            )));
        }
        Ok(())
    }
}

/// Joint parameters, fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JointParams {
    /// Anchor frame in `body0`'s local space.
    pub anchor_local: Pose,
    /// Target frame in `body1`'s local space.
    pub target_local: Pose,
    /// Joint variant.
    pub kind: JointKind,
    /// Compliance of the positional (and, for fixed joints, orientation)
    /// constraint.
    pub compliance: f64,
    /// Relative angular velocity damping (1/s).
    pub rotation_damping: f64,
    /// Relative linear velocity damping at the anchors (1/s).
    pub position_damping: f64,
    /// Swing limits, used by hinge and spherical joints.
    pub swing_limits: Option<AngleLimits>,
    /// Twist limits, used by spherical joints.
    pub twist_limits: Option<AngleLimits>,
}

impl JointParams {
    /// Parameters of the given kind with both frames at the body origins.
    #[must_use]
    pub fn new(kind: JointKind) -> Self {
        Self {
            anchor_local: Pose::identity(),
            target_local: Pose::identity(),
            kind,
            compliance: 0.0,
            rotation_damping: 0.0,
            position_damping: 0.0,
            swing_limits: None,
            twist_limits: None,
        }
    }

    /// Rigid weld.
    #[must_use]
    pub fn fixed() -> Self {
        Self::new(JointKind::Fixed)
    }

    /// Hinge about the frames' primary axis.
    #[must_use]
    pub fn hinge() -> Self {
        Self::new(JointKind::Hinge)
    }

    /// Ball and socket.
    #[must_use]
    pub fn spherical() -> Self {
        Self::new(JointKind::Spherical)
    }

    /// One-sided distance limit.
    #[must_use]
    pub fn distance(rest_distance: f64) -> Self {
        Self::new(JointKind::Distance { rest_distance })
    }

    /// Set the anchor frame on `body0`.
    #[must_use]
    pub const fn with_anchor_local(mut self, pose: Pose) -> Self {
        self.anchor_local = pose;
        self
    }

    /// Set the target frame on `body1`.
    #[must_use]
    pub const fn with_target_local(mut self, pose: Pose) -> Self {
        self.target_local = pose;
        self
    }

    /// Set the compliance.
    #[must_use]
    pub const fn with_compliance(mut self, compliance: f64) -> Self {
        self.compliance = compliance;
        self
    }

    /// Set rotational and positional damping.
    #[must_use]
    pub const fn with_damping(mut self, rotation: f64, position: f64) -> Self {
        self.rotation_damping = rotation;
        self.position_damping = position;
        self
    }

    /// Set swing limits.
    #[must_use]
    pub const fn with_swing_limits(mut self, limits: AngleLimits) -> Self {
        self.swing_limits = Some(limits);
        self
    }

    /// Set twist limits.
    #[must_use]
    pub const fn with_twist_limits(mut self, limits: AngleLimits) -> Self {
        self.twist_limits = Some(limits);
        self
    }

    /// Validate parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for negative compliance or damping, inverted
    /// or non-finite limits, a negative rest distance or non-finite frames.
    pub fn validate(&self) -> sim_types::Result<()> {
        let non_negative = |name: &str, v: f64| {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(SimError::invalid_config(format!(
                    "joint {name} must be finite and non-negative, got {v}"
                )))
            }
        };

        non_negative("compliance", self.compliance)?;
        non_negative("rotation damping", self.rotation_damping)?;
        non_negative("position damping", self.position_damping)?;

        if let JointKind::Distance { rest_distance } = self.kind {
            non_negative("rest distance", rest_distance)?;
        }

        if let Some(limits) = &self.swing_limits {
            limits.validate("swing")?;
        }
        if let Some(limits) = &self.twist_limits {
            limits.validate("twist")?;
        }

        if !self.anchor_local.is_finite() || !self.target_local.is_finite() {
            return Err(SimError::invalid_config("joint frames must be finite"));
        }

        Ok(())
    }
}

/// A joint registered with the solver.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Joint {
    body0: Option<BodyHandle>,
    body1: Option<BodyHandle>,
    params: JointParams,
    global_pose0: Pose,
    global_pose1: Pose,
}

impl Joint {
    /// Create a joint between `body0` (anchor side) and `body1` (target
    /// side). `None` attaches that side to the world.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the parameters are invalid or both sides
    /// name the same body.
    pub fn new(
        body0: Option<BodyHandle>,
        body1: Option<BodyHandle>,
        params: JointParams,
    ) -> sim_types::Result<Self> {
        params.validate()?;
        if let (Some(a), Some(b)) = (body0, body1) {
            if a == b {
                return Err(SimError::invalid_config(format!(
                    "joint cannot connect body {a} to itself"
                )));
            }
        }

        Ok(Self {
            body0,
            body1,
            params,
            global_pose0: params.anchor_local,
            global_pose1: params.target_local,
        })
    }

    /// Anchor-side body.
    #[must_use]
    pub const fn body0(&self) -> Option<BodyHandle> {
        self.body0
    }

    /// Target-side body.
    #[must_use]
    pub const fn body1(&self) -> Option<BodyHandle> {
        self.body1
    }

    /// Bodies referenced by this joint.
    pub fn bodies(&self) -> impl Iterator<Item = BodyHandle> {
        self.body0.into_iter().chain(self.body1)
    }

    /// Joint parameters.
    #[must_use]
    pub const fn params(&self) -> &JointParams {
        &self.params
    }

    /// World anchor and target frames as of the last recalculation.
    #[must_use]
    pub const fn global_poses(&self) -> (Pose, Pose) {
        (self.global_pose0, self.global_pose1)
    }

    /// Refresh the world frames from the current body poses.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` if a referenced body is gone.
    pub fn recalculate_global_poses(
        &mut self,
        bodies: &Arena<BodyHandle, Body>,
    ) -> sim_types::Result<()> {
        self.global_pose0 = attached_pose(bodies, self.body0, &self.params.anchor_local)?;
        self.global_pose1 = attached_pose(bodies, self.body1, &self.params.target_local)?;
        Ok(())
    }

    /// Project the joint's position-level constraints.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` if a referenced body is gone.
    pub fn solve_position(
        &mut self,
        dt: f64,
        bodies: &mut Arena<BodyHandle, Body>,
    ) -> sim_types::Result<()> {
        self.recalculate_global_poses(bodies)?;

        match self.params.kind {
            JointKind::Fixed => self.solve_fixed_orientation(dt, bodies),
            JointKind::Hinge => self.solve_hinge(dt, bodies)?,
            JointKind::Spherical => self.solve_spherical(dt, bodies)?,
            JointKind::Distance { .. } => {}
        }

        self.recalculate_global_poses(bodies)?;
        let p0 = self.global_pose0.position;
        let p1 = self.global_pose1.position;
        let delta = p1 - p0;

        let correction = match self.params.kind {
            JointKind::Distance { rest_distance } => {
                let distance = delta.norm();
                if distance > rest_distance {
                    delta * ((distance - rest_distance) / distance)
                } else {
                    Vector3::zeros()
                }
            }
            _ => delta,
        };

        let (b0, b1) = self.movable_pair(bodies);
        apply_body_pair_correction(
            b0,
            b1,
            &correction,
            self.params.compliance,
            dt,
            Some(&p0),
            Some(&p1),
            false,
        );

        Ok(())
    }

    /// Damp relative motion at velocity level.
    ///
    /// Each correction is at most the current relative velocity, so damping
    /// never reverses the motion.
    ///
    /// # Errors
    ///
    /// Returns `Disposed` if a referenced body is gone.
    pub fn solve_velocity(
        &mut self,
        dt: f64,
        bodies: &mut Arena<BodyHandle, Body>,
    ) -> sim_types::Result<()> {
        if self.params.rotation_damping > 0.0 {
            let w0 = side_velocity(bodies, self.body0, |b| b.angular_velocity)?;
            let w1 = side_velocity(bodies, self.body1, |b| b.angular_velocity)?;
            let omega = (w1 - w0) * (self.params.rotation_damping * dt).min(1.0);

            let (b0, b1) = self.movable_pair(bodies);
            apply_body_pair_correction(b0, b1, &omega, 0.0, dt, None, None, true);
        }

        if self.params.position_damping > 0.0 {
            self.recalculate_global_poses(bodies)?;
            let p0 = self.global_pose0.position;
            let p1 = self.global_pose1.position;

            let v0 = side_velocity(bodies, self.body0, |b| b.velocity_at(&p0))?;
            let v1 = side_velocity(bodies, self.body1, |b| b.velocity_at(&p1))?;
            let velocity = (v1 - v0) * (self.params.position_damping * dt).min(1.0);

            let (b0, b1) = self.movable_pair(bodies);
            apply_body_pair_correction(b0, b1, &velocity, 0.0, dt, Some(&p0), Some(&p1), true);
        }

        Ok(())
    }

    fn solve_fixed_orientation(&self, dt: f64, bodies: &mut Arena<BodyHandle, Body>) {
        let q = (self.global_pose1.rotation * self.global_pose0.rotation.inverse()).into_inner();
        let mut omega = q.imag() * 2.0;
        if q.scalar() < 0.0 {
            omega = -omega;
        }

        let (b0, b1) = self.movable_pair(bodies);
        apply_body_pair_correction(b0, b1, &omega, self.params.compliance, dt, None, None, false);
    }

    fn solve_hinge(&mut self, dt: f64, bodies: &mut Arena<BodyHandle, Body>) -> sim_types::Result<()> {
        let a0 = self.global_pose0.primary_axis();
        let a1 = self.global_pose1.primary_axis();
        let (b0, b1) = self.movable_pair(bodies);
        apply_body_pair_correction(b0, b1, &a0.cross(&a1), 0.0, dt, None, None, false);

        if let Some(limits) = self.params.swing_limits {
            self.recalculate_global_poses(bodies)?;
            let n = self.global_pose0.primary_axis();
            let s0 = self.global_pose0.secondary_axis();
            let s1 = self.global_pose1.secondary_axis();

            let (b0, b1) = self.movable_pair(bodies);
            limit_angle(
                b0,
                b1,
                &n,
                &s0,
                &s1,
                limits.min,
                limits.max,
                limits.compliance,
                dt,
                PI,
            );
        }

        Ok(())
    }

    fn solve_spherical(
        &mut self,
        dt: f64,
        bodies: &mut Arena<BodyHandle, Body>,
    ) -> sim_types::Result<()> {
        if let Some(limits) = self.params.swing_limits {
            self.recalculate_global_poses(bodies)?;
            let a0 = self.global_pose0.primary_axis();
            let a1 = self.global_pose1.primary_axis();
            let n = a0.cross(&a1);

            let (b0, b1) = self.movable_pair(bodies);
            limit_angle(
                b0,
                b1,
                &n,
                &a0,
                &a1,
                limits.min,
                limits.max,
                limits.compliance,
                dt,
                PI,
            );
        }

        if let Some(limits) = self.params.twist_limits {
            self.recalculate_global_poses(bodies)?;
            let n0 = self.global_pose0.primary_axis();
            let n1 = self.global_pose1.primary_axis();

            let Some(n) = (n0 + n1).try_normalize(1e-12) else {
                return Ok(());
            };
            let project = |a: Vector3<f64>| (a - n * n.dot(&a)).try_normalize(1e-12);
            let (Some(a0), Some(a1)) = (
                project(self.global_pose0.secondary_axis()),
                project(self.global_pose1.secondary_axis()),
            ) else {
                return Ok(());
            };

            // Near anti-parallel primary axes make the twist axis unstable
            let max_correction = if n0.dot(&n1) > -0.5 { 2.0 * PI } else { dt };

            let (b0, b1) = self.movable_pair(bodies);
            limit_angle(
                b0,
                b1,
                &n,
                &a0,
                &a1,
                limits.min,
                limits.max,
                limits.compliance,
                dt,
                max_correction,
            );
        }

        Ok(())
    }

    fn movable_pair<'a>(
        &self,
        bodies: &'a mut Arena<BodyHandle, Body>,
    ) -> (Option<&'a mut Body>, Option<&'a mut Body>) {
        let (b0, b1) = bodies.pair_mut(self.body0, self.body1);
        (movable(b0), movable(b1))
    }
}

/// Velocity read from one side of a joint; the world side is at rest.
fn side_velocity(
    bodies: &Arena<BodyHandle, Body>,
    handle: Option<BodyHandle>,
    read: impl FnOnce(&Body) -> Vector3<f64>,
) -> sim_types::Result<Vector3<f64>> {
    match handle {
        Some(h) => bodies
            .get(h)
            .map(read)
            .ok_or_else(|| SimError::disposed(BodyHandle::KIND, h)),
        None => Ok(Vector3::zeros()),
    }
}
