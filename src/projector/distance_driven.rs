use std::ops::Range;

use ndarray::Axis;
use ndarray::parallel::prelude::*;

use crate::circular::{CircularGeometry, ProjectionFrame};
use crate::error::{Error, Result};
use crate::fov::FOV;
use crate::image::{Detector, ProjectionStack, Volume};
use crate::types::{Index3_u, Point, Sample};
use super::{BackProjector, distance_weight, frames_of};

/// Separable-footprint distance-driven projector.
///
/// Each voxel's shadow on the detector is approximated by the bounding box of
/// its eight projected corners. The system matrix element coupling the voxel
/// to a pixel is the fraction of that box overlapping the pixel along `u`,
/// times the fraction overlapping along `v`, times the same inverse-square
/// distance weight as the `Zeng` projector. `forward_project` and
/// `back_project` apply this matrix and its transpose.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceDriven;

/// Pixels overlapped by one voxel's shadow, in one projection
struct Footprint {
    plane: usize,
    weight: f64,
    u: Vec<(usize, f64)>,
    v: Vec<(usize, f64)>,
}

impl Footprint {

    fn of(frame: &ProjectionFrame, fov: &FOV, detector: &Detector, index: Index3_u) -> Option<Self> {
        let centre = fov.voxel_centre(index);
        let (_, _, depth) = frame.project(centre);
        let half = fov.voxel_size.map(|s| s / 2.0);
        let (mut u_lo, mut u_hi) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut v_lo, mut v_hi) = (f64::INFINITY, f64::NEG_INFINITY);
        for corner in 0..8 {
            let sign = |bit: usize| if corner & (1 << bit) == 0 { -1.0 } else { 1.0 };
            let p = Point::new(centre.x + sign(0) * half[0],
                               centre.y + sign(1) * half[1],
                               centre.z + sign(2) * half[2]);
            let (u, v, _) = frame.project(p);
            u_lo = u_lo.min(u); u_hi = u_hi.max(u);
            v_lo = v_lo.min(v); v_hi = v_hi.max(v);
        }
        let u = overlaps(detector, 0, u_lo, u_hi);
        let v = overlaps(detector, 1, v_lo, v_hi);
        if u.is_empty() || v.is_empty() { return None }
        Some(Self { plane: detector.nearest_plane(depth), weight: distance_weight(frame, depth), u, v })
    }

    /// Apply `f(k, iv, iu, a_ij)` to every non-zero matrix element
    fn for_each(&self, mut f: impl FnMut(usize, usize, usize, f64)) {
        for &(iv, fv) in &self.v {
            for &(iu, fu) in &self.u {
                f(self.plane, iv, iu, self.weight * fu * fv);
            }
        }
    }
}

/// Fractions of the interval `[lo, hi]` falling in each pixel along axis `d`
fn overlaps(detector: &Detector, d: usize, lo: f64, hi: f64) -> Vec<(usize, f64)> {
    let width = hi - lo;
    if !(width > 0.0) { return vec![] }
    let n = detector.n[d] as i64;
    // Pixel `i` spans `[i - 0.5, i + 0.5)` in continuous index space
    let (clo, chi) = (detector.continuous_index(d, lo), detector.continuous_index(d, hi));
    let (a, b) = ((clo + 0.5).floor() as i64, (chi + 0.5).floor() as i64);
    let spacing = detector.spacing[d];
    (a.max(0)..=b.min(n - 1))
        .filter_map(|i| {
            let left  = (i as f64 - 0.5).max(clo);
            let right = (i as f64 + 0.5).min(chi);
            let overlap = (right - left) * spacing / width;
            (overlap > 0.0).then_some((i as usize, overlap))
        })
        .collect()
}

impl DistanceDriven {

    /// Project `volume` into the projections with series indices `indices`.
    pub fn forward_project<T: Sample>(
        &self,
        volume  : &Volume<T>,
        geometry: &CircularGeometry,
        detector: &Detector,
        indices : Range<usize>,
    ) -> Result<ProjectionStack<T>> {
        let count = geometry.count();
        if indices.end > count {
            return Err(Error::IndexOutOfRange { index: indices.end - 1, count })
        }
        let frames: Vec<_> = indices.clone().map(|i| geometry.frame(i)).collect::<Result<_>>()?;
        let mut stack = ProjectionStack::zeros(*detector, indices.start, indices.len());
        let fov = volume.fov;
        stack.data
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(frames.par_iter())
            .for_each(|(mut projection, frame)| {
                for ((iz, iy, ix), &x) in volume.data.indexed_iter() {
                    if x == T::zero() { continue }
                    let Some(footprint) = Footprint::of(frame, &fov, detector, [ix, iy, iz]) else { continue };
                    footprint.for_each(|k, iv, iu, a| projection[[k, iv, iu]] += T::of(a * x.as_f64()));
                }
            });
        Ok(stack)
    }
}

impl BackProjector for DistanceDriven {
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
                    for (j, frame) in frames.iter().enumerate() {
                        let Some(footprint) = Footprint::of(frame, &fov, &detector, [ix, iy, iz]) else { continue };
                        let mut sum = 0.0;
                        footprint.for_each(|k, iv, iu, a| sum += a * stack.data[[j, k, iv, iu]].as_f64());
                        *voxel += T::of(sum);
                    }
                }
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use units::{mm, degree};
    use ndarray::{Array3, Array4};
    use ndarray_rand::RandomExt;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use rand_isaac::Isaac64Rng;

    #[test]
    fn overlap_fractions() {
        let detector = Detector::new((mm(40.0), mm(10.0)), (4, 1)).unwrap();
        // Pixels centred on -15, -5, 5, 15; shadow from -12 to 3
        let got = overlaps(&detector, 0, -12.0, 3.0);
        let (indices, fractions): (Vec<_>, Vec<_>) = got.into_iter().unzip();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_float_eq!(fractions, vec![2.0 / 15.0, 10.0 / 15.0, 3.0 / 15.0], abs_all <= 1e-12);
        assert!(overlaps(&detector, 0, 30.0, 40.0).is_empty());
    }

    #[test]
    fn voxel_inside_detector_spreads_whole_weight() {
        let geometry = CircularGeometry::regular(1, degree(20.0), degree(360.0), mm(600.0), mm(900.0)).unwrap();
        let detector = Detector::new((mm(80.0), mm(80.0)), (16, 16)).unwrap();
        let fov = FOV::new((mm(10.0), mm(10.0), mm(10.0)), (1, 1, 1)).unwrap();
        let frame = geometry.frame(0).unwrap();
        let footprint = Footprint::of(&frame, &fov, &detector, [0, 0, 0]).unwrap();
        let mut total = 0.0;
        footprint.for_each(|_, _, _, a| total += a);
        assert_float_eq!(total, footprint.weight, rel <= 1e-12);
    }

    // <A x, y> == <x, A^T y>
    #[test]
    fn back_projection_is_adjoint_of_forward_projection() {
        let mut rng = Isaac64Rng::seed_from_u64(4321);
        let geometry = CircularGeometry::regular(7, degree(10.0), degree(360.0), mm(300.0), mm(500.0)).unwrap();
        let detector = Detector::new((mm(50.0), mm(40.0)), (10, 8)).unwrap()
            .with_depth_planes(3, mm(-8.0), mm(8.0)).unwrap();
        let fov = FOV::new((mm(24.0), mm(24.0), mm(16.0)), (6, 6, 4)).unwrap();

        let x = Array3::random_using(fov.shape(), Uniform::new(0.0, 1.0), &mut rng);
        let x = Volume { fov, data: x };
        let y = Array4::random_using(detector.shape(7), Uniform::new(0.0, 1.0), &mut rng);
        let y = ProjectionStack { detector, first: 0, data: y };

        let ax = DistanceDriven.forward_project(&x, &geometry, &detector, 0..7).unwrap();
        let mut aty = Volume::zeros(fov);
        DistanceDriven.back_project(&y, &geometry, &mut aty).unwrap();

        let lhs: f64 = ax.values().zip(y.values()).map(|(a, b)| a * b).sum();
        let rhs: f64 = x.values().zip(aty.values()).map(|(a, b)| a * b).sum();
        assert!(lhs > 0.0);
        assert_float_eq!(lhs, rhs, rel <= 1e-10);
    }

    #[test]
    fn forward_projection_beyond_geometry_rejected() {
        let geometry = CircularGeometry::regular(3, degree(0.0), degree(360.0), mm(300.0), mm(500.0)).unwrap();
        let detector = Detector::new((mm(50.0), mm(40.0)), (10, 8)).unwrap();
        let volume = Volume::<f32>::zeros(FOV::new((mm(4.0), mm(4.0), mm(4.0)), (2, 2, 2)).unwrap());
        let got = DistanceDriven.forward_project(&volume, &geometry, &detector, 1..4);
        assert!(matches!(got, Err(Error::IndexOutOfRange { index: 3, count: 3 })));
    }
}
