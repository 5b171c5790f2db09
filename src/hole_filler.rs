//! Fill small holes in sparse data.
//!
//! Binning protons into fine projections or volumes leaves some bins
//! unvisited. Isolated empty bins are noise and are filled from their
//! neighbours; large empty regions are genuinely missing data and are left
//! alone.

use std::collections::VecDeque;

use ndarray::{ArrayViewMut3, Axis};
use ndarray::parallel::prelude::*;
use serde::Deserialize;

use crate::image::{ProjectionStack, Volume};
use crate::types::Sample;

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HoleFiller {
    /// Values below this (and NaNs) are holes
    #[serde(default)]
    pub threshold: f64,
    /// Largest number of connected hole voxels which will be filled
    pub max_hole_size: usize,
}

/// What a filling pass did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillReport {
    /// Hole voxels which received a value
    pub filled: usize,
    /// Hole voxels left untouched: in holes too large, or without any valid
    /// neighbour
    pub left: usize,
}

impl std::ops::Add for FillReport {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self { filled: self.filled + other.filled, left: self.left + other.left }
    }
}

impl HoleFiller {

    pub fn new(threshold: f64, max_hole_size: usize) -> Self { Self { threshold, max_hole_size } }

    fn is_hole<T: Sample>(&self, v: T) -> bool { !(v.as_f64() >= self.threshold) }

    /// Fill the small holes of a volume, in 3D with 6-connectivity.
    pub fn fill_volume_in_place<T: Sample>(&self, volume: &mut Volume<T>) -> FillReport {
        self.fill(volume.data.view_mut())
    }

    pub fn fill_volume<T: Sample>(&self, volume: &Volume<T>) -> (Volume<T>, FillReport) {
        let mut out = volume.clone();
        let report = self.fill_volume_in_place(&mut out);
        (out, report)
    }

    /// Fill the small holes of each depth plane of each projection, in 2D
    /// with 4-connectivity.
    pub fn fill_projections_in_place<T: Sample>(&self, stack: &mut ProjectionStack<T>) -> FillReport {
        stack.data
            .outer_iter_mut()
            .into_par_iter()
            .map(|mut projection| {
                projection.outer_iter_mut()
                    .map(|plane| self.fill(plane.insert_axis(Axis(0))))
                    .fold(FillReport::default(), |a, b| a + b)
            })
            .reduce(FillReport::default, |a, b| a + b)
    }

    pub fn fill_projections<T: Sample>(&self, stack: &ProjectionStack<T>) -> (ProjectionStack<T>, FillReport) {
        let mut out = stack.clone();
        let report = self.fill_projections_in_place(&mut out);
        (out, report)
    }

    /// Fill the small holes of a 3D array, indexed `[z, y, x]`
    fn fill<T: Sample>(&self, mut data: ArrayViewMut3<T>) -> FillReport {
        let shape = data.raw_dim();
        let (nz, ny, nx) = data.dim();
        let neighbours = |[z, y, x]: [usize; 3]| {
            let mut out = Vec::with_capacity(6);
            if x > 0      { out.push([z, y, x - 1]) }
            if x + 1 < nx { out.push([z, y, x + 1]) }
            if y > 0      { out.push([z, y - 1, x]) }
            if y + 1 < ny { out.push([z, y + 1, x]) }
            if z > 0      { out.push([z - 1, y, x]) }
            if z + 1 < nz { out.push([z + 1, y, x]) }
            out
        };

        let mut hole = ndarray::Array3::from_shape_fn(shape, |(z, y, x)| self.is_hole(data[[z, y, x]]));
        let mut seen = ndarray::Array3::from_elem(shape, false);
        let mut report = FillReport::default();

        for start in ndarray::indices(shape) {
            let start = [start.0, start.1, start.2];
            if !hole[start] || seen[start] { continue }

            // Connected component of holes containing `start`
            let mut component = vec![start];
            let mut queue = VecDeque::from([start]);
            seen[start] = true;
            while let Some(here) = queue.pop_front() {
                for next in neighbours(here) {
                    if hole[next] && !seen[next] {
                        seen[next] = true;
                        component.push(next);
                        queue.push_back(next);
                    }
                }
            }
            if component.len() > self.max_hole_size {
                report.left += component.len();
                continue
            }

            // Fill from the outside in: each layer takes the mean of its valid
            // (or already filled) neighbours
            let mut remaining = component;
            loop {
                let layer: Vec<_> = remaining.iter()
                    .filter_map(|&index| {
                        let valid: Vec<T> = neighbours(index).into_iter()
                            .filter(|&n| !hole[n])
                            .map(|n| data[n])
                            .collect();
                        if valid.is_empty() { return None }
                        let mean = valid.iter().map(|v| v.as_f64()).sum::<f64>() / valid.len() as f64;
                        let lowest = valid.iter().fold(f64::INFINITY, |m, v| m.min(v.as_f64()));
                        // Rounding must not make the mean a hole again
                        Some((index, T::of(mean.max(lowest))))
                    })
                    .collect();
                if layer.is_empty() { break }
                for &(index, value) in &layer {
                    data[index] = value;
                    hole[index] = false;
                }
                report.filled += layer.len();
                remaining.retain(|&index| hole[index]);
            }
            report.left += remaining.len();
        }
        report
    }
}
