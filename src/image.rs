//! Volumes and stacks of projections.
//!
//! Both are thin wrappers around `ndarray` arrays, in standard (row-major)
//! layout, so that the fastest varying index is the last one: `x` for volumes,
//! `u` for projections. This matches the layout of the raw files.

use std::ops::Range;

use ndarray::{Array3, Array4, ArrayView3};

use units::{Length, mm_};

use crate::error::{Error, Result};
use crate::fov::FOV;
use crate::types::{Index3_u, Sample};

// ----- Volumes -------------------------------------------------------------------

/// A reconstruction (or back-projection) target.
#[derive(Clone, Debug, PartialEq)]
pub struct Volume<T> {
    pub fov: FOV,
    /// Indexed `[iz, iy, ix]`
    pub data: Array3<T>,
}

impl<T: Sample> Volume<T> {

    pub fn zeros(fov: FOV) -> Self {
        Self { fov, data: Array3::zeros(fov.shape()) }
    }

    pub fn from_vec(fov: FOV, data: Vec<T>) -> Result<Self> {
        let len = data.len();
        let data = Array3::from_shape_vec(fov.shape(), data)
            .map_err(|_| Error::InvalidConfig(format!(
                "{len} values cannot fill a FOV of {:?} voxels", fov.n)))?;
        Ok(Self { fov, data })
    }

    /// Voxel value at `[ix, iy, iz]`
    pub fn get(&self, [ix, iy, iz]: Index3_u) -> Option<T> {
        self.data.get([iz, iy, ix]).copied()
    }

    /// Voxel values with `x` varying fastest
    pub fn values(&self) -> impl Iterator<Item = T> + '_ { self.data.iter().copied() }

    pub fn sum(&self) -> T { self.data.sum() }
}

// ----- Detectors -----------------------------------------------------------------

/// Pixel grid of the detector.
///
/// The third axis samples depth planes along the beam, for depth-resolved
/// (distance-driven) proton projections. Ordinary projections have one plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detector {
    /// Number of pixels along `u`, `v` and depth
    pub n: [usize; 3],

    /// Pixel spacing (mm) along `u`, `v` and depth
    pub spacing: [f64; 3],

    /// Coordinates (mm) of the centre of pixel `[0, 0, 0]`
    pub origin: [f64; 3],
}

impl Detector {

    /// A detector of the given full size, centred on the central ray, with a
    /// single depth plane at the isocentre.
    pub fn new(size: (Length, Length), (nu, nv): (usize, usize)) -> Result<Self> {
        let full = [mm_(size.0), mm_(size.1)];
        let n = [nu, nv];
        if n.iter().any(|&n| n == 0) || !full.iter().all(|&s| s > 0.0 && s.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "detector needs pixels and positive size: {n:?}, {full:?} mm")))
        }
        let spacing = [0, 1].map(|d| full[d] / n[d] as f64);
        let origin  = [0, 1].map(|d| (spacing[d] - full[d]) / 2.0);
        Ok(Self {
            n:       [nu, nv, 1],
            spacing: [spacing[0], spacing[1], 1.0],
            origin:  [origin [0], origin [1], 0.0],
        })
    }

    /// Replace the single depth plane with `nk` planes starting at depth `first`.
    pub fn with_depth_planes(self, nk: usize, first: Length, spacing: Length) -> Result<Self> {
        let (first, spacing) = (mm_(first), mm_(spacing));
        if nk == 0 || !(spacing > 0.0) || !first.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "invalid depth planes: {nk} planes, first at {first} mm, spacing {spacing} mm")))
        }
        let [nu, nv, _] = self.n;
        let [su, sv, _] = self.spacing;
        let [ou, ov, _] = self.origin;
        Ok(Self { n: [nu, nv, nk], spacing: [su, sv, spacing], origin: [ou, ov, first] })
    }

    pub fn depth_resolved(&self) -> bool { self.n[2] > 1 }

    /// Pixels in one projection, counting all depth planes
    pub fn pixels(&self) -> usize { self.n.iter().product() }

    /// Shape of an array holding `count` projections: `[count, nk, nv, nu]`
    pub fn shape(&self, count: usize) -> [usize; 4] {
        let [nu, nv, nk] = self.n;
        [count, nk, nv, nu]
    }

    pub fn u    (&self, i: usize) -> f64 { self.origin[0] + i as f64 * self.spacing[0] }
    pub fn v    (&self, i: usize) -> f64 { self.origin[1] + i as f64 * self.spacing[1] }
    pub fn depth(&self, i: usize) -> f64 { self.origin[2] + i as f64 * self.spacing[2] }

    /// Continuous pixel index of coordinate `x` along axis `d`: pixel `i` is
    /// centred on `i`.
    pub fn continuous_index(&self, d: usize, x: f64) -> f64 {
        (x - self.origin[d]) / self.spacing[d]
    }

    /// Nearest depth plane to depth `z`, clamped to the planes available.
    pub fn nearest_plane(&self, z: f64) -> usize {
        let k = self.continuous_index(2, z).round();
        if k <= 0.0 { 0 } else { (k as usize).min(self.n[2] - 1) }
    }
}

// ----- Stacks of projections -----------------------------------------------------

/// A contiguous run of projections from a series.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionStack<T> {
    pub detector: Detector,

    /// Index of the first of these projections in the complete series
    pub first: usize,

    /// Indexed `[projection, k, v, u]`
    pub data: Array4<T>,
}

impl<T: Sample> ProjectionStack<T> {

    pub fn zeros(detector: Detector, first: usize, count: usize) -> Self {
        Self { detector, first, data: Array4::zeros(detector.shape(count)) }
    }

    pub fn from_vec(detector: Detector, first: usize, data: Vec<T>) -> Result<Self> {
        let pixels = detector.pixels();
        if data.len() % pixels != 0 {
            return Err(Error::InvalidConfig(format!(
                "{} values do not make whole projections of {pixels} pixels", data.len())))
        }
        let count = data.len() / pixels;
        let data = Array4::from_shape_vec(detector.shape(count), data)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(Self { detector, first, data })
    }

    pub fn count(&self) -> usize { self.data.shape()[0] }

    /// Indices, within the complete series, of these projections
    pub fn indices(&self) -> Range<usize> { self.first..self.first + self.count() }

    /// The `j`th projection of this stack (not of the series)
    pub fn projection(&self, j: usize) -> ArrayView3<'_, T> {
        self.data.index_axis(ndarray::Axis(0), j)
    }

    /// Values with `u` varying fastest
    pub fn values(&self) -> impl Iterator<Item = T> + '_ { self.data.iter().copied() }
}
