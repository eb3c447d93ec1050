//! Contact data structures for collision response.

use std::collections::HashMap;

use glam::Vec3;

/// Body index standing for the static ground plane at y = 0.
pub const GROUND: u32 = u32::MAX;

/// Warm-start impulses below this total magnitude are not carried over.
pub const WARM_START_EPSILON: f32 = 1e-6;

/// Geometry of a single contact between two shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactInfo {
    /// Contact normal (from shape A to shape B).
    pub normal: Vec3,
    /// Penetration depth.
    pub penetration: f32,
    /// Contact point in world space.
    pub point: Vec3,
}

impl ContactInfo {
    /// Same contact seen from the other shape.
    #[inline]
    pub fn flipped(self) -> Self {
        Self {
            normal: -self.normal,
            ..self
        }
    }
}

/// A solved or to-be-solved contact between two bodies.
///
/// `body_a < body_b` always holds, with [`GROUND`] as the largest index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub body_a: u32,
    pub body_b: u32,
    /// Unit normal pointing from A to B.
    pub normal: Vec3,
    /// Penetration depth, positive when overlapping.
    pub penetration: f32,
    /// Contact point in world space.
    pub point: Vec3,
    pub tangent1: Vec3,
    pub tangent2: Vec3,
    /// Accumulated normal impulse, never negative.
    pub normal_impulse: f32,
    /// Accumulated impulses along `tangent1` and `tangent2`.
    pub tangent_impulse: [f32; 2],
}

impl Contact {
    /// New contact with a fresh tangent basis and zero impulses.
    pub fn new(body_a: u32, body_b: u32, info: ContactInfo) -> Self {
        let (tangent1, tangent2) = tangent_basis(info.normal);
        Self {
            body_a,
            body_b,
            normal: info.normal,
            penetration: info.penetration,
            point: info.point,
            tangent1,
            tangent2,
            normal_impulse: 0.0,
            tangent_impulse: [0.0; 2],
        }
    }

    #[inline]
    pub fn is_ground(&self) -> bool {
        self.body_b == GROUND
    }

    /// Accumulated friction impulse as a world vector.
    #[inline]
    pub fn friction_impulse(&self) -> Vec3 {
        self.tangent1 * self.tangent_impulse[0] + self.tangent2 * self.tangent_impulse[1]
    }
}

/// Orthonormal tangents `(t1, t2)` completing `normal` to a right-handed basis.
///
/// The reference axis is Y when the normal is close to X, otherwise X.
#[inline]
pub fn tangent_basis(normal: Vec3) -> (Vec3, Vec3) {
    let reference = if normal.x.abs() > 0.9 { Vec3::Y } else { Vec3::X };
    let t1 = normal.cross(reference).normalize_or(Vec3::Z);
    let t2 = normal.cross(t1);
    (t1, t2)
}

/// Impulses remembered for one body pair.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CachedImpulse {
    normal: f32,
    /// World-space friction impulse, re-projected onto the new tangents.
    tangent: Vec3,
}

/// Cache of contact impulses for warm-starting the constraint solver.
///
/// Stores accumulated impulses from the previous step keyed by body pair.
/// There is one contact per pair, so matching is by key alone.
#[derive(Debug, Default)]
pub struct ContactCache {
    cache: HashMap<(u32, u32), CachedImpulse>,
}

impl ContactCache {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Seed `contacts` with last step's impulses (warm start).
    ///
    /// Pairs with negligible cached impulse start from zero.
    pub fn warm_start(&self, contacts: &mut [Contact]) {
        for contact in contacts.iter_mut() {
            let Some(cached) = self.cache.get(&(contact.body_a, contact.body_b)) else {
                continue;
            };
            let t1 = cached.tangent.dot(contact.tangent1);
            let t2 = cached.tangent.dot(contact.tangent2);
            if cached.normal.abs() + t1.abs() + t2.abs() < WARM_START_EPSILON {
                continue;
            }
            contact.normal_impulse = cached.normal.max(0.0);
            contact.tangent_impulse = [t1, t2];
        }
    }

    /// Replace the cache with this step's solved contacts.
    pub fn update(&mut self, contacts: &[Contact]) {
        self.cache.clear();
        for c in contacts {
            self.cache.insert(
                (c.body_a, c.body_b),
                CachedImpulse {
                    normal: c.normal_impulse,
                    tangent: c.friction_impulse(),
                },
            );
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
