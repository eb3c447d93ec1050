//! Collider shapes, bounding boxes and mass properties.

use glam::{Mat3, Quat, Vec3};

/// Below this magnitude a rotated axis counts as horizontal when searching
/// for the lowest point of a shape.
pub const FLAT_EPSILON: f32 = 1e-4;

/// Collision shape attached to a rigid body, in body-local space.
///
/// Capsules are aligned with the local Y axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColliderShape {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    Capsule { radius: f32, half_height: f32 },
}

/// Axis-aligned bounding box for broadphase collision detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Box centered at `center` with the given half extents.
    #[inline]
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Test whether two AABBs overlap. Touching boxes count as overlapping.
    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
}

impl ColliderShape {
    /// Numeric tag shared with the compute shaders.
    pub const SPHERE: u32 = 0;
    pub const BOX: u32 = 1;
    pub const CAPSULE: u32 = 2;

    /// Check that every dimension is finite and positive.
    ///
    /// A capsule with zero half-height is a sphere and is accepted.
    pub fn validate(&self) -> Result<(), String> {
        let positive = |name: &str, v: f32| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(format!("{name} must be finite and positive, got {v}"))
            }
        };
        match *self {
            ColliderShape::Sphere { radius } => positive("radius", radius),
            ColliderShape::Box { half_extents } => {
                positive("half_extents.x", half_extents.x)?;
                positive("half_extents.y", half_extents.y)?;
                positive("half_extents.z", half_extents.z)
            }
            ColliderShape::Capsule {
                radius,
                half_height,
            } => {
                positive("radius", radius)?;
                if half_height.is_finite() && half_height >= 0.0 {
                    Ok(())
                } else {
                    Err(format!(
                        "half_height must be finite and non-negative, got {half_height}"
                    ))
                }
            }
        }
    }

    /// Shape tag as used in GPU body records.
    pub fn kind(&self) -> u32 {
        match self {
            ColliderShape::Sphere { .. } => Self::SPHERE,
            ColliderShape::Box { .. } => Self::BOX,
            ColliderShape::Capsule { .. } => Self::CAPSULE,
        }
    }

    /// Shape parameters packed as `(x, y, z)`: sphere `(r, 0, 0)`,
    /// box half extents, capsule `(r, half_height, 0)`.
    pub fn params(&self) -> Vec3 {
        match *self {
            ColliderShape::Sphere { radius } => Vec3::new(radius, 0.0, 0.0),
            ColliderShape::Box { half_extents } => half_extents,
            ColliderShape::Capsule {
                radius,
                half_height,
            } => Vec3::new(radius, half_height, 0.0),
        }
    }

    /// Inverse of [`kind`](Self::kind) + [`params`](Self::params).
    pub fn from_packed(kind: u32, params: Vec3) -> Self {
        match kind {
            Self::BOX => ColliderShape::Box {
                half_extents: params,
            },
            Self::CAPSULE => ColliderShape::Capsule {
                radius: params.x,
                half_height: params.y,
            },
            _ => ColliderShape::Sphere { radius: params.x },
        }
    }

    /// Half extents of the world-aligned box bounding this shape at `orientation`.
    #[inline]
    pub fn world_half_extents(&self, orientation: Quat) -> Vec3 {
        match *self {
            ColliderShape::Sphere { radius } => Vec3::splat(radius),
            ColliderShape::Box { half_extents } => {
                let rot = Mat3::from_quat(orientation);
                rot.x_axis.abs() * half_extents.x
                    + rot.y_axis.abs() * half_extents.y
                    + rot.z_axis.abs() * half_extents.z
            }
            ColliderShape::Capsule {
                radius,
                half_height,
            } => (orientation * Vec3::Y).abs() * half_height + Vec3::splat(radius),
        }
    }

    /// Compute the world-space AABB for this shape.
    #[inline]
    pub fn compute_aabb(&self, position: Vec3, orientation: Quat) -> Aabb {
        Aabb::from_center(position, self.world_half_extents(orientation))
    }

    /// Diagonal inverse inertia in body axes for the given mass.
    ///
    /// Zero mass means a static body with zero inverse inertia.
    pub fn inverse_inertia(&self, mass: f32) -> Vec3 {
        if mass <= 0.0 {
            return Vec3::ZERO;
        }
        let inertia = match *self {
            ColliderShape::Sphere { radius } => Vec3::splat(0.4 * mass * radius * radius),
            ColliderShape::Box { half_extents } => {
                let sq = half_extents * half_extents;
                Vec3::new(sq.y + sq.z, sq.x + sq.z, sq.x + sq.y) * (mass / 3.0)
            }
            ColliderShape::Capsule {
                radius,
                half_height,
            } => {
                // Cylinder spanning the full capsule length.
                let length = 2.0 * (half_height + radius);
                let r2 = radius * radius;
                let side = mass / 12.0 * (3.0 * r2 + length * length);
                Vec3::new(side, 0.5 * mass * r2, side)
            }
        };
        Vec3::select(inertia.cmpgt(Vec3::ZERO), inertia.recip(), Vec3::ZERO)
    }

    /// Smallest thickness of the shape, used to decide CCD sub-stepping.
    pub fn characteristic_size(&self) -> f32 {
        match *self {
            ColliderShape::Sphere { radius } => 2.0 * radius,
            ColliderShape::Box { half_extents } => 2.0 * half_extents.min_element(),
            ColliderShape::Capsule { radius, .. } => 2.0 * radius,
        }
    }

    /// World-space point of the shape with the smallest y coordinate.
    ///
    /// When a whole edge or face is lowest, its midpoint is returned.
    pub fn lowest_point(&self, position: Vec3, orientation: Quat) -> Vec3 {
        match *self {
            ColliderShape::Sphere { radius } => position - Vec3::Y * radius,
            ColliderShape::Box { half_extents } => {
                let rot = Mat3::from_quat(orientation);
                let pick = |axis_y: f32, h: f32| {
                    if axis_y.abs() < FLAT_EPSILON {
                        0.0
                    } else {
                        -axis_y.signum() * h
                    }
                };
                let local = Vec3::new(
                    pick(rot.x_axis.y, half_extents.x),
                    pick(rot.y_axis.y, half_extents.y),
                    pick(rot.z_axis.y, half_extents.z),
                );
                position + rot * local
            }
            ColliderShape::Capsule {
                radius,
                half_height,
            } => {
                let axis = orientation * Vec3::Y;
                let end = if axis.y.abs() < FLAT_EPSILON {
                    position
                } else {
                    position - axis * axis.y.signum() * half_height
                };
                end - Vec3::Y * radius
            }
        }
    }
}
