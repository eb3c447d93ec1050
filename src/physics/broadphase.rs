//! Broadphase collision detection: spatial hash grid and all-pairs fallback.
//!
//! The grid is rebuilt from scratch every step as a counting sort:
//! count bodies per bucket, prefix-sum the counts into offsets, scatter body
//! indices, then walk each body's cells to emit candidate pairs. Bodies too
//! large for the grid are kept in a side list and tested against every other
//! body. The GPU kernels in `shaders/compute/broadphase.wgsl` run the same
//! passes.

use glam::{IVec3, Vec3};

use super::collider::Aabb;
use super::rigid_body::RigidBody;

/// Added to cell coordinates before hashing so negative cells hash like
/// positive ones.
pub const HASH_OFFSET: i32 = 1 << 20;
/// Bodies covering this many cells or more along any axis stay out of the grid.
pub const MAX_CELL_SPAN: i32 = 16;

pub const HASH_PRIME_X: u32 = 73_856_093;
pub const HASH_PRIME_Y: u32 = 19_349_663;
pub const HASH_PRIME_Z: u32 = 83_492_791;

/// Candidate pair `(a, b)` with `a < b`.
pub type CollisionPair = (u32, u32);

/// Bucket index of a grid cell.
#[inline]
pub fn hash_cell(cell: IVec3, table_size: u32) -> u32 {
    let x = cell.x.wrapping_add(HASH_OFFSET) as u32;
    let y = cell.y.wrapping_add(HASH_OFFSET) as u32;
    let z = cell.z.wrapping_add(HASH_OFFSET) as u32;
    (x.wrapping_mul(HASH_PRIME_X) ^ y.wrapping_mul(HASH_PRIME_Y) ^ z.wrapping_mul(HASH_PRIME_Z))
        % table_size.max(1)
}

/// Cell containing `point`.
#[inline]
pub fn cell_coord(point: Vec3, cell_size: f32) -> IVec3 {
    (point / cell_size).floor().as_ivec3()
}

/// Inclusive range of cells overlapped by `aabb`.
#[inline]
pub fn cell_span(aabb: &Aabb, cell_size: f32) -> (IVec3, IVec3) {
    (cell_coord(aabb.min, cell_size), cell_coord(aabb.max, cell_size))
}

/// Whether `aabb` spans [`MAX_CELL_SPAN`] cells or more on some axis.
///
/// Non-finite boxes count as oversized.
#[inline]
pub fn is_oversized(aabb: &Aabb, cell_size: f32) -> bool {
    let span = (aabb.max / cell_size).floor() - (aabb.min / cell_size).floor();
    !span.cmplt(Vec3::splat(MAX_CELL_SPAN as f32)).all()
}

/// Grid cells of a body, or `None` if it is removed or oversized.
#[inline]
fn grid_span(body: &RigidBody, aabb: &Aabb, cell_size: f32) -> Option<(IVec3, IVec3)> {
    if body.is_removed() || is_oversized(aabb, cell_size) {
        return None;
    }
    Some(cell_span(aabb, cell_size))
}

/// Whether a pair of bodies can produce a useful contact.
///
/// Pairs where neither body can move (static or sleeping) are skipped,
/// which covers the static-static exclusion. Removed bodies never pair.
#[inline]
pub fn pair_eligible(a: &RigidBody, b: &RigidBody) -> bool {
    !a.is_removed() && !b.is_removed() && (a.is_active() || b.is_active())
}

/// Compute every body's world AABB into `out`.
pub fn compute_aabbs(bodies: &[RigidBody], out: &mut Vec<Aabb>) {
    out.clear();
    out.extend(
        bodies
            .iter()
            .map(|b| b.shape.compute_aabb(b.position, b.orientation)),
    );
}

fn for_each_cell(lo: IVec3, hi: IVec3, mut f: impl FnMut(IVec3)) {
    for z in lo.z..=hi.z {
        for y in lo.y..=hi.y {
            for x in lo.x..=hi.x {
                f(IVec3::new(x, y, z));
            }
        }
    }
}

/// Spatial hash grid with bounded bucket and entry capacity.
///
/// Entries beyond a bucket's capacity, or beyond the flat entry array, are
/// dropped and counted. Pairs are reported once, from the first cell both
/// bodies share. Oversized bodies are listed separately and never dropped.
#[derive(Debug, Clone)]
pub struct SpatialHashGrid {
    table_size: u32,
    cell_capacity: u32,
    max_entries: u32,
    counts: Vec<u32>,
    offsets: Vec<u32>,
    stored: Vec<u32>,
    cursors: Vec<u32>,
    entries: Vec<u32>,
    oversized: Vec<u32>,
    dropped_entries: u32,
}

impl SpatialHashGrid {
    pub fn new(table_size: usize, cell_capacity: usize, max_entries: usize) -> Self {
        let table_size = table_size.max(1);
        Self {
            table_size: table_size as u32,
            cell_capacity: cell_capacity.max(1) as u32,
            max_entries: max_entries as u32,
            counts: vec![0; table_size],
            offsets: vec![0; table_size],
            stored: vec![0; table_size],
            cursors: vec![0; table_size],
            entries: Vec::with_capacity(max_entries.min(1 << 16)),
            oversized: Vec::new(),
            dropped_entries: 0,
        }
    }

    /// Rebuild the grid from `aabbs`. Removed bodies are left out.
    pub fn build(&mut self, bodies: &[RigidBody], aabbs: &[Aabb], cell_size: f32) {
        self.counts.fill(0);
        self.cursors.fill(0);
        self.dropped_entries = 0;
        self.oversized.clear();

        // Count
        for (index, (body, aabb)) in bodies.iter().zip(aabbs).enumerate() {
            if !body.is_removed() && is_oversized(aabb, cell_size) {
                self.oversized.push(index as u32);
            }
            let Some((lo, hi)) = grid_span(body, aabb, cell_size) else {
                continue;
            };
            for_each_cell(lo, hi, |cell| {
                self.counts[hash_cell(cell, self.table_size) as usize] += 1;
            });
        }

        // Prefix sum over clamped counts
        let mut running = 0u32;
        for i in 0..self.counts.len() {
            let wanted = self.counts[i].min(self.cell_capacity);
            let stored = wanted.min(self.max_entries.saturating_sub(running));
            self.offsets[i] = running;
            self.stored[i] = stored;
            self.dropped_entries += self.counts[i] - stored;
            running += stored;
        }

        // Scatter
        self.entries.clear();
        self.entries.resize(running as usize, u32::MAX);
        for (index, (body, aabb)) in bodies.iter().zip(aabbs).enumerate() {
            let Some((lo, hi)) = grid_span(body, aabb, cell_size) else {
                continue;
            };
            for_each_cell(lo, hi, |cell| {
                let bucket = hash_cell(cell, self.table_size) as usize;
                let slot = self.cursors[bucket];
                self.cursors[bucket] += 1;
                if slot < self.stored[bucket] {
                    self.entries[(self.offsets[bucket] + slot) as usize] = index as u32;
                }
            });
        }

        tracing::trace!(
            entries = running,
            dropped = self.dropped_entries,
            oversized = self.oversized.len(),
            "spatial grid built"
        );
    }

    /// Body indices stored in a bucket.
    pub fn bucket(&self, bucket: u32) -> &[u32] {
        let start = self.offsets[bucket as usize] as usize;
        let len = self.stored[bucket as usize] as usize;
        &self.entries[start..start + len]
    }

    /// Entries dropped by the last build.
    pub fn dropped_entries(&self) -> u32 {
        self.dropped_entries
    }

    /// Emit candidate pairs into `pairs`, at most `max_pairs`.
    ///
    /// Takes the same `aabbs` and `cell_size` as the last [`build`](Self::build).
    /// Returns the number of pairs dropped because the list was full.
    pub fn find_pairs(
        &self,
        bodies: &[RigidBody],
        aabbs: &[Aabb],
        cell_size: f32,
        max_pairs: usize,
        pairs: &mut Vec<CollisionPair>,
    ) -> u32 {
        pairs.clear();
        let mut dropped = 0u32;
        let mut emit = |pair: CollisionPair, pairs: &mut Vec<CollisionPair>| {
            if pairs.len() < max_pairs {
                pairs.push(pair);
            } else {
                dropped += 1;
            }
        };

        for (i, (body_i, aabb_i)) in bodies.iter().zip(aabbs).enumerate() {
            let Some((lo_i, hi_i)) = grid_span(body_i, aabb_i, cell_size) else {
                continue;
            };
            for_each_cell(lo_i, hi_i, |cell| {
                let bucket = self.bucket(hash_cell(cell, self.table_size));
                for (slot, &j) in bucket.iter().enumerate() {
                    let (iu, ju) = (i as u32, j);
                    if ju <= iu || bucket[..slot].contains(&ju) {
                        continue;
                    }
                    let (body_j, aabb_j) = (&bodies[j as usize], &aabbs[j as usize]);
                    if !pair_eligible(body_i, body_j) || !aabb_i.overlaps(aabb_j) {
                        continue;
                    }
                    // Only the first shared cell reports the pair.
                    let (lo_j, _) = cell_span(aabb_j, cell_size);
                    if lo_i.max(lo_j) != cell {
                        continue;
                    }
                    emit((iu, ju), pairs);
                }
            });
        }

        // Oversized bodies against everything; oversized pairs once, from the lower index.
        for &o in &self.oversized {
            let (body_o, aabb_o) = (&bodies[o as usize], &aabbs[o as usize]);
            for (j, (body_j, aabb_j)) in bodies.iter().zip(aabbs).enumerate() {
                let j = j as u32;
                if j == o || (j < o && is_oversized(aabb_j, cell_size)) {
                    continue;
                }
                if pair_eligible(body_o, body_j) && aabb_o.overlaps(aabb_j) {
                    emit((o.min(j), o.max(j)), pairs);
                }
            }
        }

        dropped
    }
}

/// All-pairs variant for small scenes. Returns the number of dropped pairs.
pub fn brute_force_pairs(
    bodies: &[RigidBody],
    aabbs: &[Aabb],
    max_pairs: usize,
    pairs: &mut Vec<CollisionPair>,
) -> u32 {
    pairs.clear();
    let mut dropped = 0u32;
    for i in 0..bodies.len() {
        for j in (i + 1)..bodies.len() {
            if !pair_eligible(&bodies[i], &bodies[j]) || !aabbs[i].overlaps(&aabbs[j]) {
                continue;
            }
            if pairs.len() < max_pairs {
                pairs.push((i as u32, j as u32));
            } else {
                dropped += 1;
            }
        }
    }
    dropped
}
