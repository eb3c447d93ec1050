//! Narrowphase collision detection: exact tests per shape pair.
//!
//! Supported pairs are sphere-sphere, box-box, sphere-box, capsule-sphere
//! and capsule-capsule, plus every shape against the ground plane.
//! Capsule-box yields no contact.

use glam::{Quat, Vec3};

use super::collider::ColliderShape;
use super::contact::{Contact, ContactInfo, GROUND};
use super::rigid_body::RigidBody;

pub const EPSILON: f32 = 1e-6;

/// Specialized sphere-sphere intersection test.
///
/// The contact point lies on A's surface along the normal.
pub fn sphere_sphere(
    center_a: Vec3,
    radius_a: f32,
    center_b: Vec3,
    radius_b: f32,
) -> Option<ContactInfo> {
    let diff = center_b - center_a;
    let dist_sq = diff.length_squared();
    let min_dist = radius_a + radius_b;

    if dist_sq >= min_dist * min_dist {
        return None;
    }

    let dist = dist_sq.sqrt();
    let normal = if dist > EPSILON { diff / dist } else { Vec3::Y };

    Some(ContactInfo {
        normal,
        penetration: min_dist - dist,
        point: center_a + normal * radius_a,
    })
}

/// Box-box test on the world-aligned bounds of both boxes.
///
/// The separating axes are x, y and z. The axis of least overlap becomes the
/// normal (first minimum wins, in x, y, z order), pointing along the centre
/// offset from A to B. The contact point is the centre of the overlap region.
pub fn box_box(
    center_a: Vec3,
    half_a: Vec3,
    center_b: Vec3,
    half_b: Vec3,
) -> Option<ContactInfo> {
    let d = center_b - center_a;
    let overlap = half_a + half_b - d.abs();
    if overlap.cmple(Vec3::ZERO).any() {
        return None;
    }

    let mut axis = 0;
    for i in 1..3 {
        if overlap[i] < overlap[axis] {
            axis = i;
        }
    }

    let mut normal = Vec3::ZERO;
    normal[axis] = if d[axis] < 0.0 { -1.0 } else { 1.0 };

    let lo = (center_a - half_a).max(center_b - half_b);
    let hi = (center_a + half_a).min(center_b + half_b);

    Some(ContactInfo {
        normal,
        penetration: overlap[axis],
        point: (lo + hi) * 0.5,
    })
}

/// Sphere against an oriented box, normal pointing from the sphere to the box.
///
/// Works in the box frame: the sphere centre is clamped onto the box; when
/// the centre is inside, the nearest face is used instead.
pub fn sphere_box(
    sphere_center: Vec3,
    radius: f32,
    box_center: Vec3,
    box_orientation: Quat,
    half_extents: Vec3,
) -> Option<ContactInfo> {
    let local = box_orientation.conjugate() * (sphere_center - box_center);
    let clamped = local.clamp(-half_extents, half_extents);
    let inside = local.abs().cmple(half_extents).all();

    // Outward box normal (box -> sphere) and surface point, in box space.
    let (outward, surface, penetration) = if inside {
        let depth = half_extents - local.abs();
        let mut axis = 0;
        for i in 1..3 {
            if depth[i] < depth[axis] {
                axis = i;
            }
        }
        let sign = if local[axis] < 0.0 { -1.0 } else { 1.0 };
        let mut n = Vec3::ZERO;
        n[axis] = sign;
        let mut surface = local;
        surface[axis] = sign * half_extents[axis];
        (n, surface, radius + depth[axis])
    } else {
        let delta = local - clamped;
        let dist_sq = delta.length_squared();
        if dist_sq >= radius * radius {
            return None;
        }
        let dist = dist_sq.sqrt();
        let n = if dist > EPSILON { delta / dist } else { Vec3::Y };
        (n, clamped, radius - dist)
    };

    Some(ContactInfo {
        normal: -(box_orientation * outward),
        penetration,
        point: box_center + box_orientation * surface,
    })
}

/// Closest point to `p` on segment `[a, b]`.
#[inline]
pub fn closest_point_on_segment(p: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= EPSILON {
        return a;
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Closest points between segments `[p1, q1]` and `[p2, q2]`.
pub fn closest_points_segments(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (Vec3, Vec3) {
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    if a <= EPSILON && e <= EPSILON {
        return (p1, p2);
    }

    let (s, t) = if a <= EPSILON {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e <= EPSILON {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            let mut s = if denom > EPSILON {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };

    (p1 + d1 * s, p2 + d2 * t)
}

/// End points of a capsule's core segment.
#[inline]
pub fn capsule_segment(center: Vec3, orientation: Quat, half_height: f32) -> (Vec3, Vec3) {
    let axis = orientation * Vec3::Y * half_height;
    (center - axis, center + axis)
}

/// Capsule against sphere, normal pointing from the capsule to the sphere.
pub fn capsule_sphere(
    capsule_center: Vec3,
    capsule_orientation: Quat,
    radius: f32,
    half_height: f32,
    sphere_center: Vec3,
    sphere_radius: f32,
) -> Option<ContactInfo> {
    let (a, b) = capsule_segment(capsule_center, capsule_orientation, half_height);
    let closest = closest_point_on_segment(sphere_center, a, b);
    sphere_sphere(closest, radius, sphere_center, sphere_radius)
}

/// Capsule against capsule via the closest points of their segments.
#[allow(clippy::too_many_arguments)]
pub fn capsule_capsule(
    center_a: Vec3,
    orientation_a: Quat,
    radius_a: f32,
    half_height_a: f32,
    center_b: Vec3,
    orientation_b: Quat,
    radius_b: f32,
    half_height_b: f32,
) -> Option<ContactInfo> {
    let (a0, a1) = capsule_segment(center_a, orientation_a, half_height_a);
    let (b0, b1) = capsule_segment(center_b, orientation_b, half_height_b);
    let (pa, pb) = closest_points_segments(a0, a1, b0, b1);
    sphere_sphere(pa, radius_a, pb, radius_b)
}

/// Detect collision between two shapes, dispatching on the shape pair.
///
/// The returned normal points from A to B.
pub fn detect_collision(a: &RigidBody, b: &RigidBody) -> Option<ContactInfo> {
    use ColliderShape::*;

    match (a.shape, b.shape) {
        (Sphere { radius: ra }, Sphere { radius: rb }) => {
            sphere_sphere(a.position, ra, b.position, rb)
        }
        (Box { .. }, Box { .. }) => box_box(
            a.position,
            a.shape.world_half_extents(a.orientation),
            b.position,
            b.shape.world_half_extents(b.orientation),
        ),
        (Sphere { radius }, Box { half_extents }) => {
            sphere_box(a.position, radius, b.position, b.orientation, half_extents)
        }
        (Box { half_extents }, Sphere { radius }) => {
            sphere_box(b.position, radius, a.position, a.orientation, half_extents)
                .map(ContactInfo::flipped)
        }
        (
            Capsule {
                radius,
                half_height,
            },
            Sphere { radius: rs },
        ) => capsule_sphere(a.position, a.orientation, radius, half_height, b.position, rs),
        (
            Sphere { radius: rs },
            Capsule {
                radius,
                half_height,
            },
        ) => capsule_sphere(b.position, b.orientation, radius, half_height, a.position, rs)
            .map(ContactInfo::flipped),
        (
            Capsule {
                radius: ra,
                half_height: ha,
            },
            Capsule {
                radius: rb,
                half_height: hb,
            },
        ) => capsule_capsule(
            a.position,
            a.orientation,
            ra,
            ha,
            b.position,
            b.orientation,
            rb,
            hb,
        ),
        (Box { .. }, Capsule { .. }) | (Capsule { .. }, Box { .. }) => None,
    }
}

/// Contact between two store entries, `index_a < index_b`.
///
/// The shape test always runs with A as the lower index so the normal keeps
/// pointing from `body_a` to `body_b`.
pub fn collide_pair(index_a: u32, a: &RigidBody, index_b: u32, b: &RigidBody) -> Option<Contact> {
    debug_assert!(index_a < index_b);
    detect_collision(a, b).map(|info| Contact::new(index_a, index_b, info))
}

/// Contact of a body against the ground plane y = 0.
///
/// The normal points from the body into the ground, `(0, -1, 0)`.
pub fn ground_contact(index: u32, body: &RigidBody) -> Option<Contact> {
    if body.is_static() {
        return None;
    }
    let lowest = body.shape.lowest_point(body.position, body.orientation);
    if lowest.y >= 0.0 {
        return None;
    }
    Some(Contact::new(
        index,
        GROUND,
        ContactInfo {
            normal: Vec3::NEG_Y,
            penetration: -lowest.y,
            point: Vec3::new(lowest.x, 0.0, lowest.z),
        },
    ))
}
