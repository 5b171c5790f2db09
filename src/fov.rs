/// The size and granularity of the Field of View (FOV) in which volumes are
/// reconstructed

use units::{Length, mm_};

use crate::error::{Error, Result};
use crate::types::{Index3_u, Point};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FOV {
    /// Number of voxels along `x`, `y` and `z`
    pub n: Index3_u,

    /// Voxel size along `x`, `y` and `z` in mm
    pub voxel_size: [f64; 3],

    /// Position (mm) of the centre of voxel `[0, 0, 0]`
    pub origin: [f64; 3],
}

impl FOV {

    /// A FOV of the given full size, centred on the isocentre.
    pub fn new(
        full_size: (Length, Length, Length),
        (nx, ny, nz): (usize, usize, usize)
    ) -> Result<Self> {
        let (dx, dy, dz) = full_size;
        let n = [nx, ny, nz];
        let full = [mm_(dx), mm_(dy), mm_(dz)];
        let voxel_size = [0, 1, 2].map(|d| full[d] / n[d] as f64);
        let origin     = [0, 1, 2].map(|d| (voxel_size[d] - full[d]) / 2.0);
        Self::with_origin(n, voxel_size, origin)
    }

    /// A FOV with explicit voxel size and position of the first voxel centre.
    pub fn with_origin(n: Index3_u, voxel_size: [f64; 3], origin: [f64; 3]) -> Result<Self> {
        if n.iter().any(|&n| n == 0) {
            return Err(Error::InvalidConfig(format!("FOV must contain voxels: {n:?}")))
        }
        if !voxel_size.iter().all(|&s| s > 0.0 && s.is_finite()) {
            return Err(Error::InvalidConfig(format!("voxel size must be positive: {voxel_size:?}")))
        }
        if !origin.iter().all(|o| o.is_finite()) {
            return Err(Error::InvalidConfig(format!("FOV origin must be finite: {origin:?}")))
        }
        Ok(Self { n, voxel_size, origin })
    }

    pub fn len(&self) -> usize { self.n.iter().product() }

    /// Shape of the `ndarray` holding this FOV's voxels: `[nz, ny, nx]`.
    pub fn shape(&self) -> [usize; 3] { let [nx, ny, nz] = self.n; [nz, ny, nx] }

    /// Find centre of voxel with given 3D index
    pub fn voxel_centre(&self, i: Index3_u) -> Point {
        let c = [0, 1, 2].map(|d| self.origin[d] + i[d] as f64 * self.voxel_size[d]);
        Point::new(c[0], c[1], c[2])
    }

    /// Corner of the FOV with the smallest coordinates.
    pub fn lower_corner(&self) -> Point {
        let c = [0, 1, 2].map(|d| self.origin[d] - self.voxel_size[d] / 2.0);
        Point::new(c[0], c[1], c[2])
    }

    /// Corner of the FOV with the largest coordinates.
    pub fn upper_corner(&self) -> Point {
        let c = [0, 1, 2].map(|d| self.origin[d] + (self.n[d] as f64 - 0.5) * self.voxel_size[d]);
        Point::new(c[0], c[1], c[2])
    }

    /// Continuous voxel coordinates of `p`: voxel `i` spans `[i, i+1)`.
    pub fn continuous_index(&self, p: Point) -> [f64; 3] {
        let l = self.lower_corner();
        [0, 1, 2].map(|d| (p[d] - l[d]) / self.voxel_size[d])
    }

    /// Index of the voxel containing `p`, if any.
    pub fn voxel_index(&self, p: Point) -> Option<Index3_u> {
        let c = self.continuous_index(p);
        let mut index = [0; 3];
        for d in 0..3 {
            if !(c[d] >= 0.0 && c[d] < self.n[d] as f64) { return None }
            index[d] = c[d] as usize;
        }
        Some(index)
    }
}
