//! Pairwise contact detection and resolution.
//!
//! Every pair of shaped bodies is tested in slot order (`i < j`), so the
//! Gauss-Seidel sweep is deterministic. Each hit is recorded as a
//! [`Contact`], pushed apart along its normal, then given a positional
//! static-friction correction bounded by the normal multiplier. Contacts
//! live until [`CollisionSystem::clear_contacts`], once per substep.

use nalgebra::{Point3, Vector3};
use sim_types::BodyHandle;
use tracing::trace;

use crate::arena::Arena;
use crate::body::{Body, apply_body_pair_correction, movable};
use crate::contact::{Contact, Penetration, PenetrationQuery, tangential_split};
use crate::gjk_epa::GjkEpa;

/// Detects and resolves contacts between bodies.
#[derive(Debug, Clone, Default)]
pub struct CollisionSystem<Q = GjkEpa> {
    query: Q,
    contacts: Vec<Contact>,
}

impl CollisionSystem<GjkEpa> {
    /// Create a collision system with the built-in GJK/EPA narrow phase.
    #[must_use]
    pub fn new() -> Self {
        Self::with_query(GjkEpa)
    }
}

impl<Q: PenetrationQuery> CollisionSystem<Q> {
    /// Create a collision system around a custom narrow phase.
    #[must_use]
    pub const fn with_query(query: Q) -> Self {
        Self {
            query,
            contacts: Vec::new(),
        }
    }

    /// Narrow phase in use.
    #[must_use]
    pub const fn query(&self) -> &Q {
        &self.query
    }

    /// Contacts recorded since the last clear.
    #[must_use]
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Drop all recorded contacts.
    pub fn clear_contacts(&mut self) {
        self.contacts.clear();
    }

    /// Detect and resolve every overlapping pair once.
    ///
    /// Pairs where neither body can move, or either body lacks a shape, are
    /// skipped. Returns the number of contacts resolved in this pass.
    pub fn solve(
        &mut self,
        bodies: &mut Arena<BodyHandle, Body>,
        dt: f64,
        default_friction: f64,
    ) -> usize {
        let handles = bodies.handles();
        let mut resolved = 0;

        for (i, &h0) in handles.iter().enumerate() {
            for &h1 in &handles[i + 1..] {
                let Some(contact) = self.detect(bodies, h0, h1, default_friction) else {
                    continue;
                };

                resolve_contact(bodies, h0, h1, &contact, dt);
                self.contacts.push(contact);
                resolved += 1;
            }
        }

        if resolved > 0 {
            trace!(contacts = resolved, "resolved collision pass");
        }
        resolved
    }

    fn detect(
        &self,
        bodies: &Arena<BodyHandle, Body>,
        h0: BodyHandle,
        h1: BodyHandle,
        default_friction: f64,
    ) -> Option<Contact> {
        let body0 = bodies.get(h0)?;
        let body1 = bodies.get(h1)?;

        if !body0.is_dynamic() && !body1.is_dynamic() {
            return None;
        }

        let Penetration {
            point,
            normal,
            depth,
        } = self
            .query
            .penetrate(body0.shape()?, &body0.pose, body1.shape()?, &body1.pose)?;

        let relative = body0.velocity_at(&point) - body1.velocity_at(&point);
        let (tangent_direction, tangent_speed) = tangential_split(&relative, &normal);

        let friction = 0.5
            * (body0.friction().unwrap_or(default_friction)
                + body1.friction().unwrap_or(default_friction));

        Some(Contact {
            body0: body0.is_dynamic().then_some(h0),
            body1: body1.is_dynamic().then_some(h1),
            point,
            normal,
            separation: -depth,
            friction,
            tangent_direction,
            tangent_speed,
        })
    }
}

/// Push the pair apart, then apply bounded static friction.
fn resolve_contact(
    bodies: &mut Arena<BodyHandle, Body>,
    h0: BodyHandle,
    h1: BodyHandle,
    contact: &Contact,
    dt: f64,
) {
    let point = contact.point;
    let correction = contact.normal * contact.separation;

    let (b0, b1) = bodies.pair_mut(Some(h0), Some(h1));
    let (mut b0, mut b1) = (movable(b0), movable(b1));
    let normal_lambda = apply_body_pair_correction(
        b0.as_deref_mut(),
        b1.as_deref_mut(),
        &correction,
        0.0,
        dt,
        Some(&point),
        Some(&point),
        false,
    );

    if !contact.is_sliding() || contact.friction == 0.0 {
        return;
    }

    let limit = friction_limit(
        b0.as_deref_mut(),
        b1.as_deref_mut(),
        contact,
        &point,
        (contact.tangent_speed * dt).min(contact.friction * normal_lambda),
    );
    if limit <= 0.0 {
        return;
    }

    apply_body_pair_correction(
        b0,
        b1,
        &(-contact.tangent_direction * limit),
        0.0,
        dt,
        Some(&point),
        Some(&point),
        false,
    );
}

/// Shrink `limit` so neither side's tangential motion would reverse.
///
/// Body 0 is decelerated against the sliding direction, body 1 along it.
fn friction_limit(
    body0: Option<&mut Body>,
    body1: Option<&mut Body>,
    contact: &Contact,
    point: &Point3<f64>,
    limit: f64,
) -> f64 {
    let direction: Vector3<f64> = contact.tangent_direction;
    let mut limit = limit;

    if let Some(body) = body0 {
        limit = limit.min(body.friction_force_limit(
            limit,
            &contact.normal,
            point,
            &-direction,
            contact.tangent_speed,
        ));
    }
    if let Some(body) = body1 {
        limit = limit.min(body.friction_force_limit(
            limit,
            &contact.normal,
            point,
            &direction,
            contact.tangent_speed,
        ));
    }

    limit
}
