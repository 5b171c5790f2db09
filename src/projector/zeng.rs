use ndarray::{ArrayView2, Axis};
use ndarray::parallel::prelude::*;

use crate::circular::CircularGeometry;
use crate::error::Result;
use crate::image::{Detector, ProjectionStack, Volume};
use crate::types::Sample;
use super::{BackProjector, distance_weight, frames_of};

/// Voxel-driven back-projection with a bilinear interpolation kernel: each
/// voxel centre is projected onto the detector and picks up the interpolated
/// pixel value, weighted by the inverse square of its distance from the
/// source.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zeng;

impl BackProjector for Zeng {
    fn back_project<T: Sample>(
        &self,
        stack   : &ProjectionStack<T>,
        geometry: &CircularGeometry,
        volume  : &mut Volume<T>,
    ) -> Result<()> {
        let frames = frames_of(stack, geometry)?;
        let fov = volume.fov;
        let detector = stack.detector;
        volume.data
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(iz, mut slice)| {
                for ((iy, ix), voxel) in slice.indexed_iter_mut() {
                    let centre = fov.voxel_centre([ix, iy, iz]);
                    for (j, frame) in frames.iter().enumerate() {
                        let (u, v, depth) = frame.project(centre);
                        let k = detector.nearest_plane(depth);
                        let plane = stack.data.slice(ndarray::s![j, k, .., ..]);
                        let value = bilinear(&plane, &detector, u, v);
                        *voxel += T::of(value * distance_weight(frame, depth));
                    }
                }
            });
        Ok(())
    }
}

/// Bilinear interpolation of `plane` (indexed `[v, u]`) at `(u, v)` mm, with
/// zeros beyond the detector edges.
fn bilinear<T: Sample>(plane: &ArrayView2<T>, detector: &Detector, u: f64, v: f64) -> f64 {
    let cu = detector.continuous_index(0, u);
    let cv = detector.continuous_index(1, v);
    if !(cu.is_finite() && cv.is_finite()) { return 0.0 }
    let (iu, iv) = (cu.floor(), cv.floor());
    let (fu, fv) = (cu - iu, cv - iv);
    let (iu, iv) = (iu as i64, iv as i64);
    let [nu, nv, _] = detector.n;
    let pixel = |i: i64, j: i64| {
        if i < 0 || j < 0 || i >= nu as i64 || j >= nv as i64 { 0.0 }
        else { plane[[j as usize, i as usize]].as_f64() }
    };
    (1.0 - fv) * ((1.0 - fu) * pixel(iu, iv    ) + fu * pixel(iu + 1, iv    )) +
           fv  * ((1.0 - fu) * pixel(iu, iv + 1) + fu * pixel(iu + 1, iv + 1))
}
