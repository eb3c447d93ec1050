//! Jacobi impulse solver with warm starting and position correction.
//!
//! Every contact computes its impulse from the same velocity snapshot and
//! records the delta; a per-body gather then folds all deltas into the next
//! snapshot. This is the double-buffered scheme the GPU kernels use, so both
//! backends converge the same way.

use glam::Vec3;

use super::contact::{Contact, ContactCache, WARM_START_EPSILON};
use super::rigid_body::RigidBody;

/// Baumgarte stabilization factor.
pub const BAUMGARTE: f32 = 0.2;
/// Penetration tolerated before any bias or correction kicks in.
pub const SLOP: f32 = 0.005;
/// Upper bound on the positional correction of one contact per step.
pub const MAX_CORRECTION: f32 = 0.2;
/// Approach speed below which restitution is ignored.
pub const RESTITUTION_THRESHOLD: f32 = 1.0;
/// Approach speed at which an awake body wakes a sleeping one.
pub const WAKE_THRESHOLD: f32 = 0.25;
/// Material of the virtual ground body.
pub const GROUND_RESTITUTION: f32 = 1.0;
pub const GROUND_FRICTION: f32 = 0.6;

pub const INV_MASS_EPSILON: f32 = 1e-8;

/// Linear and angular velocity of one body.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Velocity {
    linear: Vec3,
    angular: Vec3,
}

impl Velocity {
    #[inline]
    fn at(&self, r: Vec3) -> Vec3 {
        self.linear + self.angular.cross(r)
    }
}

/// Per-contact quantities fixed for the whole step.
#[derive(Debug, Clone, Copy, Default)]
struct Constraint {
    a: usize,
    /// `None` for the ground.
    b: Option<usize>,
    r_a: Vec3,
    r_b: Vec3,
    normal_mass: f32,
    tangent_mass: [f32; 2],
    velocity_target: f32,
    friction: f32,
    /// False when both sides are immovable.
    active: bool,
}

/// Impulse change produced by one contact in one pass.
#[derive(Debug, Clone, Copy, Default)]
struct ImpulseDelta {
    /// Impulse applied to B; A receives the opposite.
    linear: Vec3,
    angular_a: Vec3,
    angular_b: Vec3,
}

impl ImpulseDelta {
    fn new(impulse: Vec3, constraint: &Constraint) -> Self {
        Self {
            linear: impulse,
            angular_a: constraint.r_a.cross(impulse),
            angular_b: constraint.r_b.cross(impulse),
        }
    }
}

#[inline]
fn inverse_or_zero(k: f32) -> f32 {
    if k > INV_MASS_EPSILON {
        1.0 / k
    } else {
        0.0
    }
}

/// `(r × d) · I⁻¹ (r × d)` for one body.
#[inline]
fn angular_mass(body: &RigidBody, r: Vec3, direction: Vec3) -> f32 {
    let rd = r.cross(direction);
    rd.dot(body.world_inv_inertia_mul(rd))
}

/// Combined restitution and friction of a contact.
pub fn contact_material(a: &RigidBody, b: Option<&RigidBody>) -> (f32, f32) {
    match b {
        Some(b) => (
            a.restitution.min(b.restitution),
            (a.friction * b.friction).sqrt(),
        ),
        None => (
            a.restitution.min(GROUND_RESTITUTION),
            (a.friction * GROUND_FRICTION).sqrt(),
        ),
    }
}

/// Scratch state of the velocity solver, reused across steps.
#[derive(Debug, Default)]
pub struct ContactSolver {
    constraints: Vec<Constraint>,
    deltas: Vec<ImpulseDelta>,
    velocities: Vec<Velocity>,
    accumulated: Vec<Velocity>,
}

impl ContactSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve contact velocities: prepare, warm start, then `iterations`
    /// Jacobi passes. Only awake, non-static bodies are written back.
    ///
    /// Impulses already stored on the contacts (warm start) are applied
    /// before the first pass.
    pub fn solve_velocities(
        &mut self,
        bodies: &mut [RigidBody],
        contacts: &mut [Contact],
        iterations: u32,
        dt: f32,
    ) {
        if contacts.is_empty() || dt <= 0.0 {
            return;
        }

        self.prepare(bodies, contacts, dt);

        for (delta, (constraint, contact)) in self
            .deltas
            .iter_mut()
            .zip(self.constraints.iter().zip(contacts.iter()))
        {
            *delta = if constraint.active {
                warm_start_delta(constraint, contact)
            } else {
                ImpulseDelta::default()
            };
        }
        self.gather(bodies);

        for _ in 0..iterations {
            let Self {
                constraints,
                deltas,
                velocities,
                ..
            } = &mut *self;
            for ((delta, constraint), contact) in deltas
                .iter_mut()
                .zip(constraints.iter())
                .zip(contacts.iter_mut())
            {
                *delta = if constraint.active {
                    solve_contact(constraint, contact, bodies, velocities)
                } else {
                    ImpulseDelta::default()
                };
            }
            self.gather(bodies);
        }

        for (body, velocity) in bodies.iter_mut().zip(&self.velocities) {
            if body.is_active() {
                body.linear_velocity = velocity.linear;
                body.angular_velocity = velocity.angular;
            }
        }
    }

    /// Fix per-contact quantities and sample the pre-solve approach speed.
    fn prepare(&mut self, bodies: &[RigidBody], contacts: &mut [Contact], dt: f32) {
        self.velocities.clear();
        self.velocities.extend(bodies.iter().map(|b| Velocity {
            linear: b.linear_velocity,
            angular: b.angular_velocity,
        }));
        self.constraints.clear();
        self.deltas.clear();
        self.deltas.resize(contacts.len(), ImpulseDelta::default());

        for contact in contacts.iter_mut() {
            let a = contact.body_a as usize;
            let b = (!contact.is_ground()).then_some(contact.body_b as usize);
            let body_a = &bodies[a];
            let body_b = b.map(|b| &bodies[b]);

            let inv_mass_a = body_a.solver_inv_mass();
            let inv_mass_b = body_b.map_or(0.0, RigidBody::solver_inv_mass);
            if inv_mass_a + inv_mass_b < INV_MASS_EPSILON {
                contact.normal_impulse = 0.0;
                contact.tangent_impulse = [0.0; 2];
                self.constraints.push(Constraint::default());
                continue;
            }

            let r_a = contact.point - body_a.position;
            let r_b = body_b.map_or(Vec3::ZERO, |body| contact.point - body.position);
            let effective_mass = |direction: Vec3| {
                let k = inv_mass_a
                    + inv_mass_b
                    + angular_mass(body_a, r_a, direction)
                    + body_b.map_or(0.0, |body| angular_mass(body, r_b, direction));
                inverse_or_zero(k)
            };

            let (restitution, friction) = contact_material(body_a, body_b);
            let v_a = body_a.velocity_at(r_a);
            let v_b = body_b.map_or(Vec3::ZERO, |body| body.velocity_at(r_b));
            let approach = (v_b - v_a).dot(contact.normal);

            let restitution_target = if approach < -RESTITUTION_THRESHOLD {
                -restitution * approach
            } else {
                0.0
            };
            let bias = if contact.penetration > SLOP {
                BAUMGARTE / dt * (contact.penetration - SLOP)
            } else {
                0.0
            };

            // Warm-started friction stays inside the cone.
            let limit = friction * contact.normal_impulse;
            for t in contact.tangent_impulse.iter_mut() {
                *t = t.clamp(-limit, limit);
            }

            self.constraints.push(Constraint {
                a,
                b,
                r_a,
                r_b,
                normal_mass: effective_mass(contact.normal),
                tangent_mass: [
                    effective_mass(contact.tangent1),
                    effective_mass(contact.tangent2),
                ],
                velocity_target: restitution_target.max(bias),
                friction,
                active: true,
            });
        }
    }

    /// Fold this pass's deltas into the velocity snapshot.
    fn gather(&mut self, bodies: &[RigidBody]) {
        self.accumulated.clear();
        self.accumulated.resize(bodies.len(), Velocity::default());

        for (constraint, delta) in self.constraints.iter().zip(&self.deltas) {
            if !constraint.active {
                continue;
            }
            let a = &mut self.accumulated[constraint.a];
            a.linear -= delta.linear;
            a.angular -= delta.angular_a;
            if let Some(b) = constraint.b {
                let b = &mut self.accumulated[b];
                b.linear += delta.linear;
                b.angular += delta.angular_b;
            }
        }

        for ((velocity, sum), body) in self
            .velocities
            .iter_mut()
            .zip(&self.accumulated)
            .zip(bodies)
        {
            velocity.linear += sum.linear * body.solver_inv_mass();
            velocity.angular += body.world_inv_inertia_mul(sum.angular);
        }
    }
}

fn warm_start_delta(constraint: &Constraint, contact: &Contact) -> ImpulseDelta {
    let [t1, t2] = contact.tangent_impulse;
    if contact.normal_impulse.abs() + t1.abs() + t2.abs() < WARM_START_EPSILON {
        return ImpulseDelta::default();
    }
    let impulse = contact.normal * contact.normal_impulse + contact.friction_impulse();
    ImpulseDelta::new(impulse, constraint)
}

/// One Jacobi update of a single contact against the snapshot.
///
/// The normal impulse is solved first; the two friction directions then see
/// the snapshot plus that normal impulse, on local copies only.
fn solve_contact(
    constraint: &Constraint,
    contact: &mut Contact,
    bodies: &[RigidBody],
    velocities: &[Velocity],
) -> ImpulseDelta {
    let body_a = &bodies[constraint.a];
    let body_b = constraint.b.map(|b| &bodies[b]);
    let mut v_a = velocities[constraint.a];
    let mut v_b = constraint.b.map_or(Velocity::default(), |b| velocities[b]);

    let apply = |v_a: &mut Velocity, v_b: &mut Velocity, impulse: Vec3| {
        v_a.linear -= impulse * body_a.solver_inv_mass();
        v_a.angular -= body_a.world_inv_inertia_mul(constraint.r_a.cross(impulse));
        if let Some(body_b) = body_b {
            v_b.linear += impulse * body_b.solver_inv_mass();
            v_b.angular += body_b.world_inv_inertia_mul(constraint.r_b.cross(impulse));
        }
    };

    let normal = contact.normal;
    let vn = (v_b.at(constraint.r_b) - v_a.at(constraint.r_a)).dot(normal);
    let lambda = constraint.normal_mass * (constraint.velocity_target - vn);
    let old = contact.normal_impulse;
    contact.normal_impulse = (old + lambda).max(0.0);
    let normal_impulse = normal * (contact.normal_impulse - old);
    apply(&mut v_a, &mut v_b, normal_impulse);

    let mut total = normal_impulse;
    let limit = constraint.friction * contact.normal_impulse;
    for (k, tangent) in [contact.tangent1, contact.tangent2].into_iter().enumerate() {
        let vt = (v_b.at(constraint.r_b) - v_a.at(constraint.r_a)).dot(tangent);
        let lambda = -constraint.tangent_mass[k] * vt;
        let old = contact.tangent_impulse[k];
        contact.tangent_impulse[k] = (old + lambda).clamp(-limit, limit);
        let impulse = tangent * (contact.tangent_impulse[k] - old);
        apply(&mut v_a, &mut v_b, impulse);
        total += impulse;
    }

    ImpulseDelta::new(total, constraint)
}

/// Convenience wrapper with a throwaway [`ContactSolver`].
pub fn solve_contacts(
    bodies: &mut [RigidBody],
    contacts: &mut [Contact],
    iterations: u32,
    dt: f32,
) {
    ContactSolver::new().solve_velocities(bodies, contacts, iterations, dt);
}

/// Wake sleeping bodies hit by an awake partner.
///
/// A contact wakes its sleeping side when the other side is awake and the
/// approach speed along the normal exceeds [`WAKE_THRESHOLD`]. Ground
/// contacts never wake anything. Returns the number of bodies woken.
pub fn wake_touching(bodies: &mut [RigidBody], contacts: &[Contact]) -> u32 {
    let mut woken = 0;
    for contact in contacts.iter().filter(|c| !c.is_ground()) {
        let a = contact.body_a as usize;
        let b = contact.body_b as usize;
        let (sleeper, other) = match (bodies[a].is_sleeping(), bodies[b].is_sleeping()) {
            (true, false) => (a, b),
            (false, true) => (b, a),
            _ => continue,
        };
        if bodies[sleeper].is_static() || !bodies[other].is_active() {
            continue;
        }
        let r_a = contact.point - bodies[a].position;
        let r_b = contact.point - bodies[b].position;
        let relative = bodies[b].velocity_at(r_b) - bodies[a].velocity_at(r_a);
        let approach = relative.dot(contact.normal);
        if approach.abs() > WAKE_THRESHOLD {
            bodies[sleeper].wake();
            woken += 1;
        }
    }
    woken
}

/// Push overlapping bodies apart along the contact normals.
///
/// Positions only; velocities are untouched. Each contact deeper than
/// [`SLOP`] moves by `min(BAUMGARTE * (pen - SLOP), MAX_CORRECTION)`, split
/// by inverse mass share. Shifts from all contacts are summed per body.
pub fn correct_positions(bodies: &mut [RigidBody], contacts: &[Contact]) {
    let mut shifts = vec![Vec3::ZERO; bodies.len()];
    let mut any = false;

    for contact in contacts {
        if contact.penetration <= SLOP {
            continue;
        }
        let a = contact.body_a as usize;
        let b = (!contact.is_ground()).then_some(contact.body_b as usize);
        let inv_mass_a = bodies[a].solver_inv_mass();
        let inv_mass_b = b.map_or(0.0, |b| bodies[b].solver_inv_mass());
        let inv_mass_sum = inv_mass_a + inv_mass_b;
        if inv_mass_sum < INV_MASS_EPSILON {
            continue;
        }

        let correction = (BAUMGARTE * (contact.penetration - SLOP)).min(MAX_CORRECTION);
        let shift = contact.normal * (correction / inv_mass_sum);
        shifts[a] -= shift * inv_mass_a;
        if let Some(b) = b {
            shifts[b] += shift * inv_mass_b;
        }
        any = true;
    }

    if !any {
        return;
    }
    for (body, shift) in bodies.iter_mut().zip(shifts) {
        if body.is_active() {
            body.position += shift;
        }
    }
}

/// End-of-step contact clear.
///
/// The solved contacts seed the warm-start cache (when enabled) and become
/// the readable snapshot; the working list is emptied for the next step.
pub fn clear_contacts(
    working: &mut Vec<Contact>,
    cache: &mut ContactCache,
    warm_start: bool,
    snapshot: &mut Vec<Contact>,
) {
    if warm_start {
        cache.update(working);
    } else {
        cache.clear();
    }
    snapshot.clear();
    snapshot.append(working);
}
