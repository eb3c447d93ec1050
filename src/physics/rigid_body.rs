//! Body store: rigid body state, handles and descriptors.

use std::fmt;

use glam::{Quat, Vec3};

use super::collider::ColliderShape;
use super::error::PhysicsError;

bitflags::bitflags! {
    /// Status bits of a rigid body. The raw bits are shared with the shaders.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BodyFlags: u32 {
        /// Immovable; inverse mass and inertia are zero.
        const STATIC = 1;
        /// At rest; skipped by the integrator until woken.
        const SLEEPING = 1 << 1;
        /// Fast-moving body that may be sub-stepped.
        const CCD = 1 << 2;
        /// Slot of a removed body. Always combined with STATIC | SLEEPING.
        const REMOVED = 1 << 3;
    }
}

/// Stable index of a body in the store.
///
/// Never reused for a different body until the world is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyHandle(pub u32);

impl BodyHandle {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BodyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Rigid body state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidBody {
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Zero for static bodies.
    pub inv_mass: f32,
    /// Diagonal inverse inertia in body axes. Zero for static bodies.
    pub inv_inertia: Vec3,
    pub restitution: f32,
    pub friction: f32,
    pub shape: ColliderShape,
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// External force accumulated since the last step.
    pub force: Vec3,
    pub flags: BodyFlags,
    /// Consecutive steps spent below the sleep thresholds.
    pub sleep_counter: u32,
}

impl RigidBody {
    #[inline]
    pub fn is_static(&self) -> bool {
        self.flags.contains(BodyFlags::STATIC)
    }

    #[inline]
    pub fn is_sleeping(&self) -> bool {
        self.flags.contains(BodyFlags::SLEEPING)
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.flags.contains(BodyFlags::REMOVED)
    }

    /// Non-static and awake: integrated and moved by the solver.
    #[inline]
    pub fn is_active(&self) -> bool {
        !self.is_static() && !self.is_sleeping()
    }

    /// Inverse mass as seen by the solver. Sleeping bodies act immovable.
    #[inline]
    pub fn solver_inv_mass(&self) -> f32 {
        if self.is_active() {
            self.inv_mass
        } else {
            0.0
        }
    }

    /// Body-local inverse inertia as seen by the solver.
    #[inline]
    pub fn solver_inv_inertia(&self) -> Vec3 {
        if self.is_active() {
            self.inv_inertia
        } else {
            Vec3::ZERO
        }
    }

    /// Multiply a world-space vector by the world inverse inertia tensor.
    #[inline]
    pub fn world_inv_inertia_mul(&self, v: Vec3) -> Vec3 {
        let local = self.orientation.conjugate() * v;
        self.orientation * (self.solver_inv_inertia() * local)
    }

    /// Velocity of the material point at offset `r` from the center.
    #[inline]
    pub fn velocity_at(&self, r: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(r)
    }

    /// Clear the sleeping flag and restart the sleep countdown.
    pub fn wake(&mut self) {
        if self.is_static() {
            return;
        }
        self.flags.remove(BodyFlags::SLEEPING);
        self.sleep_counter = 0;
    }

    /// Mark-and-zero removal: the slot stays, the body stops taking part.
    pub fn mark_removed(&mut self) {
        self.inv_mass = 0.0;
        self.inv_inertia = Vec3::ZERO;
        self.linear_velocity = Vec3::ZERO;
        self.angular_velocity = Vec3::ZERO;
        self.force = Vec3::ZERO;
        self.flags = BodyFlags::STATIC | BodyFlags::SLEEPING | BodyFlags::REMOVED;
        self.sleep_counter = 0;
    }
}

/// Host-side description of a body to create.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyDescriptor {
    pub shape: ColliderShape,
    pub position: Vec3,
    pub orientation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Zero creates a static body.
    pub mass: f32,
    pub restitution: f32,
    pub friction: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// Allow CCD sub-stepping for this body.
    pub ccd: bool,
}

impl BodyDescriptor {
    /// Descriptor with default material: mass 1, restitution 0.3, friction 0.5.
    pub fn new(shape: ColliderShape) -> Self {
        Self {
            shape,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            mass: 1.0,
            restitution: 0.3,
            friction: 0.5,
            linear_damping: 0.01,
            angular_damping: 0.01,
            ccd: true,
        }
    }

    pub fn sphere(radius: f32) -> Self {
        Self::new(ColliderShape::Sphere { radius })
    }

    pub fn cuboid(half_extents: Vec3) -> Self {
        Self::new(ColliderShape::Box { half_extents })
    }

    pub fn capsule(radius: f32, half_height: f32) -> Self {
        Self::new(ColliderShape::Capsule {
            radius,
            half_height,
        })
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_orientation(mut self, orientation: Quat) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_linear_velocity(mut self, velocity: Vec3) -> Self {
        self.linear_velocity = velocity;
        self
    }

    pub fn with_angular_velocity(mut self, velocity: Vec3) -> Self {
        self.angular_velocity = velocity;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    /// Make the body static (mass 0).
    pub fn fixed(mut self) -> Self {
        self.mass = 0.0;
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn with_ccd(mut self, ccd: bool) -> Self {
        self.ccd = ccd;
        self
    }

    /// Reject descriptors that would create a degenerate body.
    pub fn validate(&self) -> Result<(), PhysicsError> {
        self.shape.validate().map_err(PhysicsError::invalid)?;

        if !(self.mass.is_finite() && self.mass >= 0.0) {
            return Err(PhysicsError::invalid(format!(
                "mass must be finite and non-negative, got {}",
                self.mass
            )));
        }
        if !(0.0..=1.0).contains(&self.restitution) {
            return Err(PhysicsError::invalid(format!(
                "restitution must be in [0, 1], got {}",
                self.restitution
            )));
        }
        if !(0.0..=1.0).contains(&self.friction) {
            return Err(PhysicsError::invalid(format!(
                "friction must be in [0, 1], got {}",
                self.friction
            )));
        }
        if !(self.linear_damping.is_finite() && self.linear_damping >= 0.0)
            || !(self.angular_damping.is_finite() && self.angular_damping >= 0.0)
        {
            return Err(PhysicsError::invalid("damping must be finite and non-negative"));
        }
        if !self.position.is_finite()
            || !self.linear_velocity.is_finite()
            || !self.angular_velocity.is_finite()
        {
            return Err(PhysicsError::invalid("position and velocities must be finite"));
        }
        if !self.orientation.is_finite() || self.orientation.length_squared() < 1e-8 {
            return Err(PhysicsError::invalid(
                "orientation must be a finite, non-zero quaternion",
            ));
        }
        Ok(())
    }

    /// Build the body state. Call [`validate`](Self::validate) first.
    pub fn to_body(&self) -> RigidBody {
        let is_static = self.mass == 0.0;
        let mut flags = BodyFlags::empty();
        flags.set(BodyFlags::STATIC, is_static);
        flags.set(BodyFlags::CCD, self.ccd);

        let (linear_velocity, angular_velocity) = if is_static {
            (Vec3::ZERO, Vec3::ZERO)
        } else {
            (self.linear_velocity, self.angular_velocity)
        };

        RigidBody {
            position: self.position,
            orientation: self.orientation.normalize(),
            linear_velocity,
            angular_velocity,
            inv_mass: if is_static { 0.0 } else { 1.0 / self.mass },
            inv_inertia: self.shape.inverse_inertia(self.mass),
            restitution: self.restitution,
            friction: self.friction,
            shape: self.shape,
            linear_damping: self.linear_damping,
            angular_damping: self.angular_damping,
            force: Vec3::ZERO,
            flags,
            sleep_counter: 0,
        }
    }
}

/// Flat array of bodies addressed by [`BodyHandle`].
#[derive(Debug, Clone, Default)]
pub struct BodyStore {
    bodies: Vec<RigidBody>,
    capacity: usize,
}

impl BodyStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            bodies: Vec::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Validate and append a body. Nothing is stored on failure.
    pub fn insert(&mut self, desc: &BodyDescriptor) -> Result<BodyHandle, PhysicsError> {
        desc.validate()?;
        if self.bodies.len() >= self.capacity {
            return Err(PhysicsError::capacity(self.capacity));
        }
        let handle = BodyHandle(self.bodies.len() as u32);
        self.bodies.push(desc.to_body());
        Ok(handle)
    }

    /// Live body for `handle`.
    pub fn get(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle.index()).filter(|b| !b.is_removed())
    }

    /// Mutable live body for `handle`.
    pub fn get_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
        self.bodies
            .get_mut(handle.index())
            .filter(|b| !b.is_removed())
    }

    /// Mark-and-zero the body; its handle is never reissued.
    pub fn remove(&mut self, handle: BodyHandle) -> Result<(), PhysicsError> {
        let body = self
            .get_mut(handle)
            .ok_or(PhysicsError::InvalidHandle(handle))?;
        body.mark_removed();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.bodies.clear();
    }

    /// Number of slots, removed ones included.
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bodies that have not been removed.
    pub fn live_count(&self) -> usize {
        self.bodies.iter().filter(|b| !b.is_removed()).count()
    }

    pub fn as_slice(&self) -> &[RigidBody] {
        &self.bodies
    }

    pub fn as_mut_slice(&mut self) -> &mut [RigidBody] {
        &mut self.bodies
    }

    /// Iterate live bodies with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (BodyHandle, &RigidBody)> {
        self.bodies
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_removed())
            .map(|(i, b)| (BodyHandle(i as u32), b))
    }
}
