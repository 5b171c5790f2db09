use crate::circular::{CircularGeometry, ProjectionFrame};
use crate::error::Result;
use crate::image::{Detector, ProjectionStack};
use crate::types::Sample;
use super::{Weigh, check_stack, weigh_pixels};

/// FDK pre-weighting: ray-divergence (cosine) weight of each pixel, times the
/// angular integration step of each projection.
#[derive(Clone, Debug)]
pub struct FdkWeights {
    detector: Detector,
    frames: Vec<ProjectionFrame>,
    /// `0.5 · increment · SDD / SID` of each projection
    angular: Vec<f64>,
}

impl FdkWeights {

    pub fn new(geometry: &CircularGeometry, detector: &Detector) -> Self {
        let frames = geometry.frames();
        let angular = geometry.angular_increments().into_iter()
            .zip(frames.iter())
            .map(|(increment, f)| 0.5 * increment * ramp_factor(f))
            .collect();
        Self { detector: *detector, frames, angular }
    }

    /// Weight of pixel `(u, v)` (mm) of projection `i`
    pub fn weight(&self, i: usize, u: f64, v: f64) -> f64 {
        self.angular[i] * cosine(&self.frames[i], u, v)
    }
}

/// Rescaling of the ramp filter from detector to isocentre coordinates
fn ramp_factor(frame: &ProjectionFrame) -> f64 {
    if frame.is_parallel() { 1.0 } else { frame.sdd / frame.sid }
}

/// Cosine of the angle between the ray through `(u, v)` and the central ray
fn cosine(frame: &ProjectionFrame, u: f64, v: f64) -> f64 {
    if frame.is_parallel() { return 1.0 }
    let (x, y) = frame.detector_plane_position(u, v);
    let sdd = frame.sdd;
    sdd / (sdd * sdd + x * x + y * y).sqrt()
}

impl Weigh for FdkWeights {
    fn apply_in_place<T: Sample>(&self, stack: &mut ProjectionStack<T>) -> Result<()> {
        check_stack(stack, &self.detector, self.frames.len())?;
        let angular = &self.angular;
        weigh_pixels(stack, &self.frames, |i, frame, u, v| angular[i] * cosine(frame, u, v));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use units::{mm, degree};
    use crate::circular::ProjectionParameters;

    #[test]
    fn central_ray_gets_angular_weight_only() {
        let geometry = CircularGeometry::regular(360, degree(0.0), degree(360.0), mm(1000.0), mm(1500.0)).unwrap();
        let detector = Detector::new((mm(30.0), mm(30.0)), (3, 3)).unwrap();
        let w = FdkWeights::new(&geometry, &detector);
        let step = std::f64::consts::PI / 180.0;
        assert_float_eq!(w.weight(17, 0.0, 0.0), 0.5 * step * 1.5, rel <= 1e-12);
        // Corner pixel: 10 mm off in u and v
        let expected = 0.5 * step * 1.5 * 1500.0 / (1500.0_f64.powi(2) + 200.0).sqrt();
        assert_float_eq!(w.weight(17, 10.0, -10.0), expected, rel <= 1e-12);
    }

    #[test]
    fn weights_applied_to_every_plane() {
        let geometry = CircularGeometry::regular(4, degree(0.0), degree(360.0), mm(1000.0), mm(1500.0)).unwrap();
        let detector = Detector::new((mm(30.0), mm(10.0)), (3, 1)).unwrap()
            .with_depth_planes(2, mm(-10.0), mm(20.0)).unwrap();
        let w = FdkWeights::new(&geometry, &detector);
        let stack = ProjectionStack::from_vec(detector, 0, vec![1.0_f64; 4 * 6]).unwrap();
        let out = w.apply(&stack).unwrap();
        for j in 0..4 {
            let p = out.projection(j);
            for iu in 0..3 {
                assert_eq!(p[[0, 0, iu]], p[[1, 0, iu]]);
                assert_float_eq!(p[[0, 0, iu]], w.weight(j, detector.u(iu), 0.0), ulps <= 1);
            }
        }
    }

    #[test]
    fn parallel_beam_has_no_cosine_weight() {
        let params = (0..8)
            .map(|i| ProjectionParameters::new(degree(45.0 * i as f64), mm(1000.0), mm(0.0)))
            .collect();
        let geometry = CircularGeometry::new(params).unwrap();
        let detector = Detector::new((mm(30.0), mm(30.0)), (3, 3)).unwrap();
        let w = FdkWeights::new(&geometry, &detector);
        assert_float_eq!(w.weight(3, 10.0, 10.0), 0.5 * std::f64::consts::FRAC_PI_4, rel <= 1e-12);
    }
}
