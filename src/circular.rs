//! Acquisition geometry of a circular source-detector trajectory.
//!
//! One record per projection, in acquisition order. Angles need not be
//! monotonic: everything that depends on angular neighbours (gaps,
//! increments, short-scan detection) works on the circularly sorted angles.

use ordered_float::OrderedFloat;

use units::{Angle, Length, mm, mm_, radian, radian_, TWOPI};

use crate::error::{Error, Result};
use crate::types::Point;

/// Gaps at least this large may be the missing arc of a short scan.
pub const SHORT_SCAN_MIN_GAP: f64 = std::f64::consts::PI / 9.0;

/// Acquisition parameters of a single projection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectionParameters {
    /// Rotation of the source about the `y`-axis
    pub gantry_angle: Angle,

    /// Source to isocentre distance
    pub sid: Length,

    /// Source to detector distance; zero means parallel beam
    pub sdd: Length,

    /// Rotation of the detector in its own plane
    pub in_plane_rotation: Angle,

    /// Detector offset along `u`
    pub offset_u: Length,

    /// Detector offset along `v`
    pub offset_v: Length,
}

impl ProjectionParameters {

    pub fn new(gantry_angle: Angle, sid: Length, sdd: Length) -> Self {
        Self {
            gantry_angle, sid, sdd,
            in_plane_rotation: radian(0.0),
            offset_u: mm(0.0),
            offset_v: mm(0.0),
        }
    }

    pub fn with_offsets(self, offset_u: Length, offset_v: Length) -> Self {
        Self { offset_u, offset_v, ..self }
    }

    pub fn with_rotation(self, in_plane_rotation: Angle) -> Self {
        Self { in_plane_rotation, ..self }
    }

    fn check(&self) -> Result<()> {
        let finite = [
            radian_(self.gantry_angle), radian_(self.in_plane_rotation),
            mm_(self.sid), mm_(self.sdd), mm_(self.offset_u), mm_(self.offset_v),
        ].iter().all(|x| x.is_finite());
        if !finite {
            return Err(Error::InvalidConfig(format!("non-finite projection parameters: {self:?}")))
        }
        if mm_(self.sid) <= 0.0 || mm_(self.sdd) < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "source distances must be positive (SID {} mm, SDD {} mm)",
                mm_(self.sid), mm_(self.sdd)
            )))
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CircularGeometry {
    projections: Vec<ProjectionParameters>,
}

impl CircularGeometry {

    pub fn new(projections: Vec<ProjectionParameters>) -> Result<Self> {
        for p in &projections { p.check()? }
        Ok(Self { projections })
    }

    /// `n` projections evenly spread over `arc`, starting at `first_angle`.
    pub fn regular(n: usize, first_angle: Angle, arc: Angle, sid: Length, sdd: Length) -> Result<Self> {
        let step = arc / n as f64;
        Self::new((0..n)
                  .map(|i| ProjectionParameters::new(first_angle + step * i as f64, sid, sdd))
                  .collect())
    }

    pub fn count(&self) -> usize { self.projections.len() }

    pub fn iter(&self) -> impl Iterator<Item = &ProjectionParameters> { self.projections.iter() }

    pub fn parameters(&self, i: usize) -> Result<&ProjectionParameters> {
        self.projections.get(i)
            .ok_or(Error::IndexOutOfRange { index: i, count: self.count() })
    }

    pub fn angle                       (&self, i: usize) -> Result<Angle > { Ok(self.parameters(i)?.gantry_angle) }
    pub fn source_to_isocenter_distance(&self, i: usize) -> Result<Length> { Ok(self.parameters(i)?.sid) }
    pub fn source_to_detector_distance (&self, i: usize) -> Result<Length> { Ok(self.parameters(i)?.sdd) }
    pub fn rotation                    (&self, i: usize) -> Result<Angle > { Ok(self.parameters(i)?.in_plane_rotation) }

    pub fn detector_offset(&self, i: usize) -> Result<(Length, Length)> {
        let p = self.parameters(i)?;
        Ok((p.offset_u, p.offset_v))
    }

    /// Fail with `GeometryMismatch` unless `supplied` projections match this
    /// geometry.
    pub fn ensure_projection_count(&self, supplied: usize) -> Result<()> {
        if supplied == self.count() { Ok(()) }
        else { Err(Error::GeometryMismatch { geometry: self.count(), supplied }) }
    }

    /// Gantry angles in radians, wrapped into `[0, 2π)`.
    pub fn angles(&self) -> Vec<f64> {
        self.projections.iter()
            .map(|p| radian_(p.gantry_angle).rem_euclid(radian_(TWOPI)))
            .collect()
    }

    /// Projection indices ordered by wrapped gantry angle.
    pub fn sorted_indices(&self) -> Vec<usize> {
        let angles = self.angles();
        let mut order: Vec<usize> = (0..self.count()).collect();
        order.sort_by_key(|&i| OrderedFloat(angles[i]));
        order
    }

    /// For each projection, the angle (radians) to the next projection in
    /// circular order.
    pub fn angular_gaps(&self) -> Vec<f64> {
        let n = self.count();
        let angles = self.angles();
        let order = self.sorted_indices();
        let mut gaps = vec![radian_(TWOPI); n];
        if n < 2 { return gaps }
        for (j, &this) in order.iter().enumerate() {
            let next = order[(j + 1) % n];
            let mut gap = angles[next] - angles[this];
            if j + 1 == n { gap += radian_(TWOPI) }
            gaps[this] = gap;
        }
        gaps
    }

    /// The projection which starts the missing arc of a short scan, if there
    /// is one.
    ///
    /// The largest gap counts as missing arc when it is at least 20 degrees
    /// and more than twice the mean of the other gaps.
    pub fn short_scan_gap(&self) -> Option<usize> {
        let n = self.count();
        if n < 2 { return None }
        let gaps = self.angular_gaps();
        let (largest, &max_gap) = gaps.iter().enumerate()
            .max_by_key(|&(_, &g)| OrderedFloat(g))?;
        let mean_others = (gaps.iter().sum::<f64>() - max_gap) / (n - 1) as f64;
        (max_gap >= SHORT_SCAN_MIN_GAP && max_gap > 2.0 * mean_others).then_some(largest)
    }

    /// Angular integration step (radians) of each projection: half the sum of
    /// the gaps to its angular neighbours. The missing arc of a short scan is
    /// replaced by the gap on the other side.
    pub fn angular_increments(&self) -> Vec<f64> {
        let n = self.count();
        let gaps = self.angular_gaps();
        if n < 2 { return gaps }
        let hole = self.short_scan_gap();
        let order = self.sorted_indices();
        let mut increments = vec![0.0; n];
        for (j, &this) in order.iter().enumerate() {
            let prev = order[(j + n - 1) % n];
            let (mut before, mut after) = (gaps[prev], gaps[this]);
            if hole == Some(prev) { before = after  }
            if hole == Some(this) { after  = before }
            increments[this] = 0.5 * (before + after);
        }
        increments
    }
}

// ----- Projection frames --------------------------------------------------------
/// The parameters of one projection with units stripped, in the form needed by
/// the inner loops: lengths in mm, trigonometric functions precomputed.
///
/// The gantry frame rotates with the source: the beam travels along `+z`, the
/// source sits at `z = -sid` and the detector plane at `z = sdd - sid`.
/// Detector coordinates `(u, v)` are measured in the detector's own frame,
/// which is offset and rotated in-plane with respect to the gantry's `(x, y)`.
#[derive(Clone, Copy, Debug)]
pub struct ProjectionFrame {
    pub sid: f64,
    pub sdd: f64,
    pub angle: f64,
    sin_angle: f64,
    cos_angle: f64,
    sin_rotation: f64,
    cos_rotation: f64,
    offset_u: f64,
    offset_v: f64,
}

impl From<&ProjectionParameters> for ProjectionFrame {
    fn from(p: &ProjectionParameters) -> Self {
        let angle = radian_(p.gantry_angle);
        let (sin_angle, cos_angle) = angle.sin_cos();
        let (sin_rotation, cos_rotation) = radian_(p.in_plane_rotation).sin_cos();
        Self {
            sid: mm_(p.sid), sdd: mm_(p.sdd), angle,
            sin_angle, cos_angle, sin_rotation, cos_rotation,
            offset_u: mm_(p.offset_u), offset_v: mm_(p.offset_v),
        }
    }
}

impl ProjectionFrame {

    pub fn is_parallel(&self) -> bool { self.sdd == 0.0 }

    /// Object frame to gantry frame
    pub fn to_gantry(&self, p: Point) -> Point {
        let (s, c) = (-self.sin_angle, self.cos_angle);
        Point::new(c * p.x + s * p.z, p.y, -s * p.x + c * p.z)
    }

    /// Gantry frame to object frame
    pub fn to_object(&self, p: Point) -> Point {
        let (s, c) = (self.sin_angle, self.cos_angle);
        Point::new(c * p.x + s * p.z, p.y, -s * p.x + c * p.z)
    }

    /// Ratio of detector-plane to object-plane distances for a point at depth
    /// `z` in the gantry frame.
    pub fn magnification(&self, z: f64) -> f64 {
        if self.is_parallel() { 1.0 } else { self.sdd / (self.sid + z) }
    }

    /// Detector coordinates `(u, v)` of the ray through `p` (object frame), and
    /// the depth of `p` along the beam.
    pub fn project(&self, p: Point) -> (f64, f64, f64) {
        let g = self.to_gantry(p);
        let m = self.magnification(g.z);
        let (x, y) = (g.x * m, g.y * m);
        let u =  self.cos_rotation * x + self.sin_rotation * y - self.offset_u;
        let v = -self.sin_rotation * x + self.cos_rotation * y - self.offset_v;
        (u, v, g.z)
    }

    /// Position `(x, y)` in the gantry frame's detector plane of detector
    /// coordinates `(u, v)`: inverse of the in-plane part of `project`.
    pub fn detector_plane_position(&self, u: f64, v: f64) -> (f64, f64) {
        let (u, v) = (u + self.offset_u, v + self.offset_v);
        (self.cos_rotation * u - self.sin_rotation * v,
         self.sin_rotation * u + self.cos_rotation * v)
    }
}

impl CircularGeometry {
    pub fn frame(&self, i: usize) -> Result<ProjectionFrame> {
        Ok(self.parameters(i)?.into())
    }

    pub fn frames(&self) -> Vec<ProjectionFrame> {
        self.projections.iter().map(Into::into).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use float_eq::assert_float_eq;
    use units::degree;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    fn full_scan(n: usize) -> CircularGeometry {
        CircularGeometry::regular(n, degree(0.0), degree(360.0), mm(1000.0), mm(1500.0)).unwrap()
    }

    #[test]
    fn accessors() {
        let p = ProjectionParameters::new(degree(30.0), mm(800.0), mm(1200.0))
            .with_offsets(mm(1.5), mm(-2.0))
            .with_rotation(degree(2.0));
        let g = CircularGeometry::new(vec![p]).unwrap();
        assert_eq!(g.count(), 1);
        assert_eq!(g.angle(0).unwrap(), degree(30.0));
        assert_eq!(g.source_to_isocenter_distance(0).unwrap(), mm(800.0));
        assert_eq!(g.source_to_detector_distance(0).unwrap(), mm(1200.0));
        assert_eq!(g.detector_offset(0).unwrap(), (mm(1.5), mm(-2.0)));
        assert_eq!(g.rotation(0).unwrap(), degree(2.0));
    }

    #[test]
    fn index_out_of_range() {
        let g = full_scan(4);
        assert!(matches!(g.angle(4), Err(Error::IndexOutOfRange { index: 4, count: 4 })));
        assert!(matches!(g.detector_offset(10), Err(Error::IndexOutOfRange { .. })));
    }

    #[test]
    fn projection_count_mismatch() {
        let g = full_scan(10);
        assert!(g.ensure_projection_count(10).is_ok());
        assert!(matches!(g.ensure_projection_count(9),
                         Err(Error::GeometryMismatch { geometry: 10, supplied: 9 })));
    }

    #[rstest(/**/ sid, sdd, angle,
             case(   0.0, 1500.0,  0.0),
             case(1000.0,  -10.0,  0.0),
             case(1000.0, 1500.0, f64::NAN),
             case(f64::INFINITY, 1500.0, 0.0),
    )]
    fn invalid_parameters_rejected(sid: f64, sdd: f64, angle: f64) {
        let p = ProjectionParameters::new(radian(angle), mm(sid), mm(sdd));
        assert!(matches!(CircularGeometry::new(vec![p]), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn gaps_of_unsorted_angles() {
        let g = CircularGeometry::new(
            [90.0, 0.0, 270.0, 180.0].iter()
                .map(|&a| ProjectionParameters::new(degree(a), mm(1.0), mm(2.0)))
                .collect()
        ).unwrap();
        let expected = std::f64::consts::FRAC_PI_2;
        assert_float_eq!(g.angular_gaps(), vec![expected; 4], abs_all <= 1e-12);
        assert_eq!(g.short_scan_gap(), None);
    }

    #[test]
    fn full_scan_increments_sum_to_full_turn() {
        let g = full_scan(360);
        let total: f64 = g.angular_increments().iter().sum();
        assert_float_eq!(total, std::f64::consts::TAU, rel <= 1e-12);
    }

    #[test]
    fn short_scan_detected() {
        // 200 degrees in 1 degree steps
        let g = CircularGeometry::regular(201, degree(10.0), degree(201.0), mm(1000.0), mm(1500.0)).unwrap();
        assert_eq!(g.short_scan_gap(), Some(200));
        let increments = g.angular_increments();
        let step = 1.0_f64.to_radians();
        assert_float_eq!(increments[  0], step, rel <= 1e-9);
        assert_float_eq!(increments[200], step, rel <= 1e-9);
        assert_float_eq!(increments[100], step, rel <= 1e-9);
    }

    #[rstest(/**/ angle, x, y, z,
             case(  0.0, 10.0,  5.0, -3.0),
             case( 37.0, -4.0,  2.0, 11.0),
             case(250.0,  0.5, -9.0,  7.5),
    )]
    fn frames_roundtrip(angle: f64, x: f64, y: f64, z: f64) {
        let p = ProjectionParameters::new(degree(angle), mm(1000.0), mm(1500.0));
        let frame = ProjectionFrame::from(&p);
        let q = frame.to_object(frame.to_gantry(Point::new(x, y, z)));
        assert_float_eq!([q.x, q.y, q.z], [x, y, z], abs <= [1e-12; 3]);
    }

    #[test]
    fn projection_magnifies_and_applies_offsets() {
        let p = ProjectionParameters::new(degree(0.0), mm(1000.0), mm(1500.0))
            .with_offsets(mm(2.0), mm(-1.0));
        let frame = ProjectionFrame::from(&p);
        let (u, v, depth) = frame.project(Point::new(10.0, 4.0, 0.0));
        assert_float_eq!((u, v, depth), (13.0, 7.0, 0.0), abs <= (1e-12, 1e-12, 0.0));
        let (x, y) = frame.detector_plane_position(u, v);
        assert_float_eq!((x, y), (15.0, 6.0), abs <= (1e-12, 1e-12));
    }

    #[test]
    fn quarter_turn_source_comes_from_minus_x() {
        // After a quarter turn the beam, which travels along +z in the gantry
        // frame, travels along +x in the object frame
        let p = ProjectionParameters::new(degree(90.0), mm(1000.0), mm(0.0));
        let frame = ProjectionFrame::from(&p);
        let g = frame.to_gantry(Point::new(5.0, 0.0, 0.0));
        assert_float_eq!(g.z, 5.0, abs <= 1e-12);
        assert!(frame.is_parallel());
    }
}
