//! Find the voxels traversed by a straight segment, and the length of the
//! segment inside each of them.
//!
//! The traversal is centred around one simplification: express the voxel size
//! in terms of the segment's direction. This allows trivial calculation of how
//! far we must move along the segment before reaching the next voxel boundary,
//! in any dimension.

use crate::fov::FOV;
use crate::types::{Index3_u, Point};

pub type SystemMatrixElement = (Index3_u, f64);

/// Voxels coupled to one segment, with the length (mm) of the segment in each.
#[derive(Clone, Debug, Default)]
pub struct SystemMatrixRow(pub Vec<SystemMatrixElement>);

impl SystemMatrixRow {

    /// Buffer large enough for any segment crossing `fov`
    pub fn buffer(fov: &FOV) -> Self {
        let [nx, ny, nz] = fov.n;
        Self(Vec::with_capacity(nx + ny + nz))
    }

    pub fn iter(&self) -> std::slice::Iter<SystemMatrixElement> { self.0.iter() }

    pub fn clear(&mut self) { self.0.clear() }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Total length of the segment inside the FOV
    pub fn total_length(&self) -> f64 { self.0.iter().map(|(_, l)| l).sum() }
}

impl<'a> IntoIterator for &'a SystemMatrixRow {
    type Item = &'a SystemMatrixElement;
    type IntoIter = std::slice::Iter<'a, SystemMatrixElement>;
    fn into_iter(self) -> Self::IntoIter { self.0.iter() }
}

/// The part of segment `p1 → p2` inside `fov`, as distances along the segment
/// from `p1`.
fn clip(fov: &FOV, p1: Point, direction: [f64; 3], length: f64) -> Option<(f64, f64)> {
    let (lo, hi) = (fov.lower_corner(), fov.upper_corner());
    let (mut t0, mut t1) = (0.0_f64, length);
    for d in 0..3 {
        if direction[d] == 0.0 {
            if p1[d] < lo[d] || p1[d] >= hi[d] { return None }
        } else {
            let a = (lo[d] - p1[d]) / direction[d];
            let b = (hi[d] - p1[d]) / direction[d];
            t0 = t0.max(a.min(b));
            t1 = t1.min(a.max(b));
        }
    }
    (t0 < t1).then_some((t0, t1))
}

/// Place the voxels crossed by segment `p1 → p2` and the lengths crossed in
/// each of them, in `row`. Using an output parameter rather than a return
/// value, because this is called in the inner loop of pair back-projection,
/// many times per pair.
pub fn update_row(row: &mut SystemMatrixRow, fov: &FOV, p1: Point, p2: Point) {
    // Throw away previous segment's values
    row.clear();

    let delta = p2 - p1;
    let length = delta.norm();
    if !(length > 0.0) { return }
    let direction = [delta.x / length, delta.y / length, delta.z / length];

    let Some((t0, t1)) = clip(fov, p1, direction, length) else { return };

    // Continuous voxel coordinates of the entry point
    let entry = p1 + delta * (t0 / length);
    let c = fov.continuous_index(entry);

    let mut index       = [0_i64; 3];
    let mut delta_index = [0_i64; 3];
    let mut remaining   = [0_i64; 3];
    // Distance along the segment to the next boundary, and between boundaries,
    // in each dimension
    let mut next_boundary = [f64::INFINITY; 3];
    let mut voxel_size    = [f64::INFINITY; 3];

    for d in 0..3 {
        let n = fov.n[d] as i64;
        let size = fov.voxel_size[d];
        // On a boundary, start in the voxel we are moving into
        let i = if direction[d] < 0.0 { c[d].ceil() as i64 - 1 } else { c[d].floor() as i64 };
        index[d] = i.clamp(0, n - 1);
        if direction[d] > 0.0 {
            delta_index[d] = 1;
            remaining[d] = n - index[d];
            voxel_size[d] = size / direction[d];
            next_boundary[d] = t0 + (index[d] as f64 + 1.0 - c[d]) * voxel_size[d];
        } else if direction[d] < 0.0 {
            delta_index[d] = -1;
            remaining[d] = index[d] + 1;
            voxel_size[d] = size / -direction[d];
            next_boundary[d] = t0 + (c[d] - index[d] as f64) * voxel_size[d];
        } else {
            remaining[d] = i64::MAX;
        }
    }

    // How far we have moved along the segment
    let mut here = t0;

    loop {
        // Which voxel boundary will be hit next, and its position
        let (dimension, boundary) = argmin(next_boundary);

        // The weight is the length of segment in this voxel
        let exit = boundary.min(t1);
        let weight = exit - here;

        // Store the index and weight of the voxel we have just crossed
        if weight > 0.0 {
            row.0.push((index.map(|i| i as usize), weight));
        }

        // The segment ends inside this voxel
        if boundary >= t1 { break }

        // Move along segment until it leaves this voxel
        here = boundary;

        // Find the next boundary in this dimension
        next_boundary[dimension] += voxel_size[dimension];

        // Move index across the boundary we are crossing
        index[dimension] += delta_index[dimension];
        remaining[dimension] -= 1;

        // If we have traversed the whole FOV, we're finished
        if remaining[dimension] == 0 { break }
    }
}

fn argmin(v: [f64; 3]) -> (usize, f64) {
    let mut best = (0, v[0]);
    for (d, &x) in v.iter().enumerate().skip(1) {
        if x < best.1 { best = (d, x) }
    }
    best
}
