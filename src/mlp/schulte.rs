//! Most likely path from the multiple-scattering covariances (Schulte et al.,
//! Med. Phys. 35 (2008)), optionally accounting for tracker resolution and
//! tracker material (Krah et al., Phys. Med. Biol. 63 (2018)).
//!
//! The state of each transverse axis is the vector `(position, slope)`. For
//! an intermediate depth `u1` the estimate combines the entry state carried
//! forward, `R0 x0`, with the exit state carried backward, `R1⁻¹ x2`,
//! weighted by the scattering covariances accumulated on either side:
//!
//! ```text
//! x = C2 (C1 + C2)⁻¹ R0 x0  +  C1 (C1 + C2)⁻¹ R1⁻¹ x2
//! ```
//!
//! with `C1 = Σ1` and `C2 = R1⁻¹ Σ2 R1ᵀ⁻¹` when the trackers are ideal.

use nalgebra::{Matrix2, Vector2};
use serde::Deserialize;

use units::{Length, mm_};

use crate::error::{Error, Result};
use crate::types::Point;
use super::{Boundary, MostLikelyPath, Span};

/// Radiation length of water, mm
const X0: f64 = 361.0;

/// Highland constant, MeV
const HIGHLAND: f64 = 13.6;

/// `1/(β²p²)` (MeV⁻²) of protons in water as a polynomial in depth (mm),
/// fitted for 200 MeV beams.
const INVERSE_BETA_P_SQUARED: [f64; 6] = [
    7.457e-6,
    4.548e-8,
   -5.777e-10,
    1.301e-11,
   -9.228e-14,
    2.687e-16,
];

/// `∫₀ᵘ tⁿ / (β²p²) dt`
fn moment(n: i32, u: f64) -> f64 {
    INVERSE_BETA_P_SQUARED.iter().enumerate()
        .map(|(k, a)| { let p = k as i32 + n + 1; a * u.powi(p) / p as f64 })
        .sum()
}

/// Highland prefactor for the scattering accumulated between depths `a` and `b`
fn highland(a: f64, b: f64) -> f64 {
    let log = 1.0 + 0.038 * ((b - a) / X0).ln();
    HIGHLAND * HIGHLAND / X0 * log * log
}

/// Translation of a `(position, slope)` state over distance `d`
fn drift(d: f64) -> Matrix2<f64> { Matrix2::new(1.0, d, 0.0, 1.0) }

/// Inverse of a 2x2 matrix. Singular input gives non-finite output, which
/// the pair accumulators detect and reject.
fn inverse(m: &Matrix2<f64>) -> Matrix2<f64> {
    let det = m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)];
    Matrix2::new(m[(1, 1)], -m[(0, 1)], -m[(1, 0)], m[(0, 0)]) / det
}

/// Position and resolution of the trackers around the object.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerUncertainty {
    /// Spatial resolution of each tracker plane
    #[serde(deserialize_with = "crate::config::deserialize_uom")]
    pub resolution: Length,

    /// Distance between the two planes of each tracker pair
    #[serde(deserialize_with = "crate::config::deserialize_uom")]
    pub spacing: Length,

    /// Thickness of one tracker plane in radiation lengths
    pub material_budget: f64,
}

impl TrackerUncertainty {
    fn check(&self) -> Result<()> {
        let (r, s, b) = (mm_(self.resolution), mm_(self.spacing), self.material_budget);
        if r >= 0.0 && s > 0.0 && b >= 0.0 && r.is_finite() && s.is_finite() && b.is_finite() { Ok(()) }
        else {
            Err(Error::InvalidConfig(format!(
                "tracker needs non-negative resolution and material budget, positive spacing: {self:?}")))
        }
    }

    /// Covariances of the `(position, slope)` measured by the entry and exit
    /// trackers, for a path of length `u2` through the object.
    fn covariances(&self, u2: f64) -> (Matrix2<f64>, Matrix2<f64>) {
        let sigma_p_sq = mm_(self.resolution).powi(2);
        let s = mm_(self.spacing);
        let mut sigma_in  = Matrix2::new(1.0,  1.0 / s,  1.0 / s, 2.0 / (s * s)) * sigma_p_sq;
        let mut sigma_out = Matrix2::new(1.0, -1.0 / s, -1.0 / s, 2.0 / (s * s)) * sigma_p_sq;
        // Scattering in the tracker planes themselves
        let c = HIGHLAND * HIGHLAND / X0;
        let thickness = self.material_budget * X0;
        sigma_in [(1, 1)] += moment(0, thickness) * c;
        sigma_out[(1, 1)] += (moment(0, u2 + thickness) - moment(0, u2)) * c;
        (sigma_in, sigma_out)
    }
}

/// The Schulte most likely path.
#[derive(Clone, Debug)]
pub struct Schulte {
    tracker: Option<TrackerUncertainty>,
    span: Span,
    /// Entry tracker covariance propagated to the entry boundary
    tracker_in: Matrix2<f64>,
    /// Exit tracker covariance propagated back to the exit boundary
    tracker_out: Matrix2<f64>,
    /// Moments 0, 1 and 2 of `1/(β²p²)` over the whole path
    moments2: [f64; 3],
}

impl Schulte {

    pub fn new(tracker: Option<TrackerUncertainty>) -> Result<Self> {
        if let Some(t) = &tracker { t.check()? }
        Ok(Self {
            tracker,
            span: Span::default(),
            tracker_in: Matrix2::zeros(),
            tracker_out: Matrix2::zeros(),
            moments2: [f64::NAN; 3],
        })
    }

    /// Scattering covariance accumulated between entry and depth `u1`
    fn sigma1(&self, u1: f64) -> Matrix2<f64> {
        if !(u1 > 0.0) { return Matrix2::zeros() }
        let [i0, i1, i2] = [0, 1, 2].map(|n| moment(n, u1));
        let tt = i0;
        let xt = u1 * tt - i1;
        let xx = u1 * (2.0 * xt - u1 * tt) + i2;
        Matrix2::new(xx, xt, xt, tt) * highland(0.0, u1)
    }

    /// Scattering covariance accumulated between depth `u1` and exit
    fn sigma2(&self, u1: f64) -> Matrix2<f64> {
        let u2 = self.span.u2;
        if !(u1 < u2) { return Matrix2::zeros() }
        let [i0, i1, i2] = [0, 1, 2].map(|n| moment(n, u1));
        let [j0, j1, j2] = self.moments2;
        let tt = j0 - i0;
        let xt = u2 * tt - j1 + i1;
        let xx = u2 * (2.0 * xt - u2 * tt) + j2 - i2;
        Matrix2::new(xx, xt, xt, tt) * highland(u1, u2)
    }

    /// Covariances `C1` and `C2` of the forward and backward estimates at `u1`,
    /// together with the propagators `R0` and `R1⁻¹`.
    fn covariances(&self, u1: f64) -> (Matrix2<f64>, Matrix2<f64>, Matrix2<f64>, Matrix2<f64>) {
        let r0 = drift(u1);
        let r1_inv = drift(u1 - self.span.u2);
        let c1 = r0 * self.tracker_in * r0.transpose() + self.sigma1(u1);
        let c2 = r1_inv * (self.tracker_out + self.sigma2(u1)) * r1_inv.transpose();
        (c1, c2, r0, r1_inv)
    }

    /// `(position, slope)` estimates for both transverse axes at `u1`,
    /// inside the object.
    fn interior(&self, u1: f64) -> [Vector2<f64>; 2] {
        let (c1, c2, r0, r1_inv) = self.covariances(u1);
        let sum_inv = inverse(&(c1 + c2));
        let from_entry = c2 * sum_inv * r0;
        let from_exit  = c1 * sum_inv * r1_inv;
        self.span.axes.map(|a| {
            from_entry * Vector2::new(a.x0, a.s0) + from_exit * Vector2::new(a.x2, a.s2)
        })
    }

    /// `(position, slope)` for both axes at any `u1`. Outside the object the
    /// path continues along the boundary tangents.
    fn state(&self, u1: f64) -> [Vector2<f64>; 2] {
        let u2 = self.span.u2;
        if u1 <= 0.0 {
            self.span.axes.map(|a| Vector2::new(a.x0 + a.s0 * u1, a.s0))
        } else if u1 >= u2 {
            self.span.axes.map(|a| Vector2::new(a.x2 + a.s2 * (u1 - u2), a.s2))
        } else {
            self.interior(u1)
        }
    }

    /// Covariance of `(position, slope)` of the estimate at `depth`, common to
    /// both transverse axes. Vanishes at the boundaries when the trackers are
    /// ideal.
    pub fn uncertainty(&self, depth: f64) -> Matrix2<f64> {
        let u1 = self.span.u(depth).max(0.0).min(self.span.u2);
        let (c1, c2, _, _) = self.covariances(u1);
        // 2 (C1⁻¹ + C2⁻¹)⁻¹, without inverting the possibly singular C1 or C2
        c1 * inverse(&(c1 + c2)) * c2 * 2.0
    }
}

impl MostLikelyPath for Schulte {

    fn init(&mut self, entry: &Boundary, exit: &Boundary) -> Result<()> {
        let span = Span::new(entry, exit)?;
        self.moments2 = [0, 1, 2].map(|n| moment(n, span.u2));
        (self.tracker_in, self.tracker_out) = match &self.tracker {
            None => (Matrix2::zeros(), Matrix2::zeros()),
            Some(t) => {
                let (sigma_in, sigma_out) = t.covariances(span.u2);
                let s_in = drift(entry.tracker_distance);
                let s_out_inv = inverse(&drift(exit.tracker_distance));
                (s_in * sigma_in * s_in.transpose(),
                 s_out_inv * sigma_out * s_out_inv.transpose())
            }
        };
        self.span = span;
        Ok(())
    }

    fn evaluate(&self, depth: f64) -> Point {
        if let Some(p) = self.span.pinned(depth) { return p }
        let [x, y] = self.state(self.span.u(depth));
        Point::new(x[0], y[0], depth)
    }

    fn slope(&self, depth: f64) -> (f64, f64) {
        if let Some(s) = self.span.pinned_slope(depth) { return s }
        let [x, y] = self.state(self.span.u(depth));
        (x[1], y[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use units::mm;
    use crate::types::Vector;

    #[test]
    fn moments_match_quadrature() {
        for n in 0..3 {
            let numeric = crate::physics::adaptive_simpson(
                |t| t.powi(n) * INVERSE_BETA_P_SQUARED.iter().rev().fold(0.0, |acc, a| acc * t + a),
                0.0, 180.0, 1e-12 * moment(n, 180.0),
            ).unwrap();
            assert_float_eq!(moment(n, 180.0), numeric, rel <= 1e-9);
        }
    }

    #[test]
    fn covariances_are_symmetric_and_grow() {
        let mut mlp = Schulte::new(None).unwrap();
        mlp.init(&Boundary::at(Point::new(0.0, 0.0,   0.0), Vector::z()),
                 &Boundary::at(Point::new(0.0, 0.0, 200.0), Vector::z())).unwrap();
        let (near, far) = (mlp.sigma1(50.0), mlp.sigma1(150.0));
        assert_eq!(near[(0, 1)], near[(1, 0)]);
        assert!(far[(0, 0)] > near[(0, 0)] && far[(1, 1)] > near[(1, 1)]);
        assert!(near.determinant() > 0.0);
        // Angular spread after 20 cm of water: a few tens of milliradians
        let theta = mlp.sigma1(199.9)[(1, 1)].sqrt();
        assert!(theta > 0.01 && theta < 0.05, "{theta}");
    }

    #[test]
    fn uncertainty_largest_inside() {
        let mut mlp = Schulte::new(None).unwrap();
        mlp.init(&Boundary::at(Point::new(0.0, 0.0, -100.0), Vector::z()),
                 &Boundary::at(Point::new(0.0, 0.0,  100.0), Vector::z())).unwrap();
        let sd = |depth: f64| mlp.uncertainty(depth)[(0, 0)].sqrt();
        assert_float_eq!(sd(-100.0), 0.0, abs <= 1e-9);
        assert_float_eq!(sd( 100.0), 0.0, abs <= 1e-9);
        assert!(sd(-50.0) > 0.0 && sd(0.0) > sd(-50.0) && sd(0.0) > sd(50.0));
        // Well below a millimetre at the centre of 20 cm of water
        assert!(sd(0.0) > 0.2 && sd(0.0) < 1.0, "{}", sd(0.0));
    }

    #[test]
    fn tracker_uncertainty_widens_boundaries() {
        let tracker = TrackerUncertainty { resolution: mm(0.15), spacing: mm(50.0), material_budget: 5e-3 };
        let mut mlp = Schulte::new(Some(tracker)).unwrap();
        mlp.init(&Boundary::at(Point::new(0.0, 0.0, -100.0), Vector::z()).with_tracker_distance(30.0),
                 &Boundary::at(Point::new(0.0, 0.0,  100.0), Vector::z()).with_tracker_distance(30.0)).unwrap();
        assert!(mlp.uncertainty(-100.0)[(0, 0)] > 0.0);
    }

    #[test]
    fn invalid_tracker_rejected() {
        let tracker = TrackerUncertainty { resolution: mm(0.1), spacing: mm(0.0), material_budget: 5e-3 };
        assert!(matches!(Schulte::new(Some(tracker)), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn extrapolation_follows_tangents() {
        let mut mlp = Schulte::new(None).unwrap();
        mlp.init(&Boundary::at(Point::new(1.0, 2.0, 0.0), Vector::new(0.1, 0.0, 1.0)),
                 &Boundary::at(Point::new(5.0, 2.0, 100.0), Vector::new(0.0, -0.2, 1.0))).unwrap();
        let before = mlp.evaluate(-10.0);
        let after  = mlp.evaluate(110.0);
        assert_float_eq!([before.x, before.y], [0.0, 2.0], abs <= [1e-12; 2]);
        assert_float_eq!([after .x, after .y], [5.0, 0.0], abs <= [1e-12; 2]);
    }
}
