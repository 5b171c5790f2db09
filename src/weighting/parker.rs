//! Parker weights for short scans (Parker, Med. Phys. 9 (1982)).
//!
//! A short scan covers `π + 2δ` of gantry rotation. Rays measured twice within
//! the scan are down-weighted so that each line through the object counts
//! once: with `β` the gantry angle from the start of the scan and `α` the fan
//! angle of the ray, the conjugate of `(β, α)` is `(β + π + 2α, -α)`, and the
//! two weights sum to one.

use std::f64::consts::PI;

use units::{radian_, TWOPI};

use crate::circular::{CircularGeometry, ProjectionFrame};
use crate::error::Result;
use crate::image::{Detector, ProjectionStack};
use crate::types::Sample;
use super::{Weigh, check_stack, weigh_pixels};

#[derive(Clone, Debug)]
pub struct Parker {
    detector: Detector,
    frames: Vec<ProjectionFrame>,
    /// `None` when the geometry is not a divergent-beam short scan
    scan: Option<ShortScan>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct ShortScan {
    /// Gantry angle of the first projection after the missing arc
    first: f64,
    /// Half the overscan beyond `π`
    delta: f64,
}

impl Parker {

    pub fn new(geometry: &CircularGeometry, detector: &Detector) -> Self {
        let frames = geometry.frames();
        let scan = short_scan(geometry, &frames);
        if let Some(ShortScan { delta, .. }) = scan {
            let half_fan = half_fan_angle(&frames, detector);
            if delta < half_fan {
                eprintln!("Warning: not enough data for Parker short-scan weighting: \
                           overscan is {:.2} degrees, should be at least {:.2} degrees (half the fan angle)",
                          delta.to_degrees(), half_fan.to_degrees());
            }
        }
        Self { detector: *detector, frames, scan }
    }

    pub fn is_short_scan(&self) -> bool { self.scan.is_some() }

    /// Redundancy weight in `[0, 1]` of the ray through detector point `(u, v)`
    /// of a projection acquired at gantry angle `angle` (radians) with
    /// geometry `frame`.
    pub fn redundancy(&self, frame: &ProjectionFrame, angle: f64, u: f64, v: f64) -> f64 {
        let Some(scan) = self.scan else { return 1.0 };
        let beta = (angle - scan.first).rem_euclid(radian_(TWOPI));
        redundancy(beta, fan_angle(frame, u, v), scan.delta)
    }

    /// Weight applied to pixel `(u, v)` of projection `i`: twice the
    /// redundancy weight, compensating the halving in the FDK angular weights.
    pub fn weight(&self, i: usize, u: f64, v: f64) -> f64 {
        if self.scan.is_none() { return 1.0 }
        let frame = &self.frames[i];
        2.0 * self.redundancy(frame, frame.angle, u, v)
    }
}

impl Weigh for Parker {
    fn apply_in_place<T: Sample>(&self, stack: &mut ProjectionStack<T>) -> Result<()> {
        check_stack(stack, &self.detector, self.frames.len())?;
        if self.scan.is_none() { return Ok(()) }
        weigh_pixels(stack, &self.frames, |_, frame, u, v| 2.0 * self.redundancy(frame, frame.angle, u, v));
        Ok(())
    }
}

/// Detect a divergent-beam short scan and find its start and overscan.
fn short_scan(geometry: &CircularGeometry, frames: &[ProjectionFrame]) -> Option<ShortScan> {
    if frames.first()?.is_parallel() { return None }
    let last_index = geometry.short_scan_gap()?;
    let order = geometry.sorted_indices();
    let angles = geometry.angles();
    let position = order.iter().position(|&i| i == last_index)?;
    let first = angles[order[(position + 1) % order.len()]];
    let mut last = angles[last_index];
    if last < first { last += radian_(TWOPI) }
    Some(ShortScan { first, delta: 0.5 * (last - first - PI) })
}

/// Fan angle of the ray through `(u, v)`: its angle to the central ray, in
/// the plane of rotation.
fn fan_angle(frame: &ProjectionFrame, u: f64, v: f64) -> f64 {
    let (x, _) = frame.detector_plane_position(u, v);
    // Distance from the central ray at the isocentre
    let l = x * frame.sid / frame.sdd;
    (l / frame.sid).atan()
}

fn half_fan_angle(frames: &[ProjectionFrame], detector: &Detector) -> f64 {
    let [nu, nv, _] = detector.n;
    let edges = [(0, 0), (nu - 1, 0), (0, nv - 1), (nu - 1, nv - 1)];
    frames.iter()
        .flat_map(|f| edges.iter().map(move |&(iu, iv)| fan_angle(f, detector.u(iu), detector.v(iv)).abs()))
        .fold(0.0, f64::max)
}

/// Parker's weight of the ray at fan angle `alpha`, at gantry angle `beta`
/// from the start of a scan of `π + 2 delta`.
fn redundancy(beta: f64, alpha: f64, delta: f64) -> f64 {
    let sin2 = |x: f64| x.sin().powi(2);
    if beta <= 2.0 * delta - 2.0 * alpha {
        sin2(PI * beta / (4.0 * (delta - alpha)))
    } else if beta <= PI - 2.0 * alpha {
        1.0
    } else if beta <= PI + 2.0 * delta {
        sin2(PI * (PI + 2.0 * delta - beta) / (4.0 * (delta + alpha)))
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use float_eq::assert_float_eq;
    use units::{mm, degree};
    use crate::types::Point;

    const SID: f64 = 1000.0;
    const SDD: f64 = 1500.0;

    /// 200 projections, one per degree starting at 30 degrees
    fn short_scan_geometry() -> CircularGeometry {
        CircularGeometry::regular(200, degree(30.0), degree(200.0), mm(SID), mm(SDD)).unwrap()
    }

    fn detector() -> Detector {
        Detector::new((mm(200.0), mm(50.0)), (100, 5)).unwrap()
    }

    #[test]
    fn full_scan_is_left_alone() {
        let geometry = CircularGeometry::regular(90, degree(0.0), degree(360.0), mm(SID), mm(SDD)).unwrap();
        let parker = Parker::new(&geometry, &detector());
        assert!(!parker.is_short_scan());
        let stack = ProjectionStack::from_vec(detector(), 0, vec![3.0_f32; 90 * 500]).unwrap();
        assert_eq!(parker.apply(&stack).unwrap(), stack);
    }

    #[test]
    fn short_scan_detected() {
        let parker = Parker::new(&short_scan_geometry(), &detector());
        let scan = parker.scan.unwrap();
        assert_float_eq!(scan.first, 30.0_f64.to_radians(), abs <= 1e-12);
        assert_float_eq!(scan.delta, 9.5_f64.to_radians(), abs <= 1e-12);
    }

    #[test]
    fn weights_vanish_at_scan_ends_and_reach_two_inside() {
        let parker = Parker::new(&short_scan_geometry(), &detector());
        assert_float_eq!(parker.weight(  0, 0.0, 0.0), 0.0, abs <= 1e-12);
        assert_float_eq!(parker.weight(100, 0.0, 0.0), 2.0, abs <= 1e-12);
        assert!(parker.weight(199, 0.0, 0.0) < 0.01);
    }

    #[test]
    fn conjugate_ray_is_the_same_line() {
        // (β, α) and (β + π + 2α, -α) trace the same line through the object
        let parker = Parker::new(&short_scan_geometry(), &detector());
        let geometry = short_scan_geometry();
        let frame = geometry.frame(0).unwrap();
        let u = 60.0;
        let alpha = fan_angle(&frame, u, 0.0);
        let other = crate::circular::ProjectionParameters::new(
            units::radian(frame.angle + PI + 2.0 * alpha), mm(SID), mm(SDD));
        let conjugate = ProjectionFrame::from(&other);
        // A point on the first ray, half way between source and detector
        let g = Point::new(u * 0.5, 0.0, SDD * 0.5 - SID);
        let (u2, v2, _) = conjugate.project(frame.to_object(g));
        assert_float_eq!(u2, -u, abs <= 1e-9);
        assert_float_eq!(v2, 0.0, abs <= 1e-9);
        assert!(parker.is_short_scan());
    }

    proptest! {
        #[test]
        fn conjugate_weights_sum_to_one(
            beta in 0.0..(PI + 2.0 * 9.5_f64.to_radians()),
            u    in -100.0..(100.0 as f64),
        ) {
            let parker = Parker::new(&short_scan_geometry(), &detector());
            let frame = short_scan_geometry().frame(0).unwrap();
            let start = 30.0_f64.to_radians();
            let alpha = fan_angle(&frame, u, 0.0);
            // Angles wrap around, so the conjugate may precede the ray
            let conjugate_beta = beta + PI + 2.0 * alpha;
            let sum = parker.redundancy(&frame, start + beta, u, 0.0)
                    + parker.redundancy(&frame, start + conjugate_beta, -u, 0.0);
            prop_assert!((sum - 1.0).abs() < 1e-12, "sum {sum}");
        }
    }
}
