//! Polynomial approximation of the most likely path (Krah et al., Phys. Med.
//! Biol. 63 (2018)).
//!
//! `1/(β²p²)` along the path is replaced by a polynomial of the chosen degree
//! `N`, fitted for 180 MeV protons in water. The most likely path is then a
//! polynomial of degree `N + 3` in depth, whose coefficients follow in closed
//! form from the boundary conditions.

use crate::error::{Error, Result};
use crate::types::Point;
use super::{AxisEnds, Boundary, MostLikelyPath, Span};

/// Coefficients `b_i` of the `1/(β²p²)` fits (MeV⁻², depth in mm), by degree.
const B: [&[f64]; 5] = [
    &[2.221018e-07,  1.176787e-07],
    &[7.256003e-06, -1.075769e-07,  1.200877e-09],
    &[3.279817e-06,  1.475374e-07, -2.201247e-09,  1.209155e-11],
    &[5.401888e-06, -7.991486e-08,  3.262799e-09, -3.323899e-11,  1.208325e-13],
    &[4.307328e-06,  9.657939e-08, -3.338966e-09,  6.069645e-11, -4.427153e-13, 1.201749e-15],
];

pub const MIN_DEGREE: usize = 1;
pub const MAX_DEGREE: usize = 5;

/// Number of path coefficients for the highest degree
const MAX_TERMS: usize = MAX_DEGREE + 4;

#[derive(Clone, Debug)]
pub struct Polynomial {
    b: &'static [f64],
    span: Span,
    /// Path coefficients of `x` and `y`, lowest power first
    d: [[f64; MAX_TERMS]; 2],
}

impl Polynomial {

    pub fn new(degree: usize) -> Result<Self> {
        if !(MIN_DEGREE..=MAX_DEGREE).contains(&degree) {
            return Err(Error::UnsupportedDegree { degree })
        }
        Ok(Self { b: B[degree - MIN_DEGREE], span: Span::default(), d: [[f64::NAN; MAX_TERMS]; 2] })
    }

    pub fn degree(&self) -> usize { self.b.len() - 1 }

    fn terms(&self) -> usize { self.degree() + 4 }

    fn b(&self, i: usize) -> f64 { self.b.get(i).copied().unwrap_or(0.0) }

    /// Path coefficients of one axis, given the fitting factors `[A, B, C, D]`
    fn coefficients(&self, ends: &AxisEnds, [a, b, c, d]: [f64; 4]) -> [f64; MAX_TERMS] {
        let n = self.degree();
        let u2 = self.span.u2;
        let dx = ends.x2 - ends.x0 - ends.s0 * u2;
        let ds = ends.s2 - ends.s0;
        let det = a * d - b * c;
        let c0 = (d * ds - b * dx) / det;
        let c1 = (a * dx - c * ds) / det;

        let mut out = [0.0; MAX_TERMS];
        out[0] = ends.x0;
        out[1] = ends.s0;
        out[2] = c0 * self.b(0) / 2.0;
        for k in 3..n + 3 {
            out[k] = (c0 * self.b(k - 2) + c1 * self.b(k - 3)) / (k * (k - 1)) as f64;
        }
        out[n + 3] = c1 * self.b(n) / ((n + 2) * (n + 3)) as f64;
        out
    }

    /// Fitting factors `A`, `B`, `C` and `D`: integrals of the `1/(β²p²)`
    /// polynomial over the whole path.
    fn factors(&self, u: f64) -> [f64; 4] {
        let mut f = [0.0; 4];
        for (i, b) in self.b.iter().enumerate() {
            let i_ = i as f64;
            f[0] += b / (i_ + 1.0)                 * u.powi(i as i32 + 1);
            f[1] += b / (i_ + 2.0)                 * u.powi(i as i32 + 2);
            f[2] += b / ((i_ + 1.0) * (i_ + 2.0))  * u.powi(i as i32 + 2);
            f[3] += b / ((i_ + 2.0) * (i_ + 3.0))  * u.powi(i as i32 + 3);
        }
        f
    }

    fn value(&self, axis: usize, u: f64) -> f64 {
        self.d[axis][..self.terms()].iter().rev().fold(0.0, |acc, c| acc * u + c)
    }

    fn derivative(&self, axis: usize, u: f64) -> f64 {
        self.d[axis][1..self.terms()].iter().enumerate().rev()
            .fold(0.0, |acc, (k, c)| acc * u + (k + 1) as f64 * c)
    }
}

impl MostLikelyPath for Polynomial {

    fn init(&mut self, entry: &Boundary, exit: &Boundary) -> Result<()> {
        self.span = Span::new(entry, exit)?;
        let factors = self.factors(self.span.u2);
        self.d = self.span.axes.map(|ends| self.coefficients(&ends, factors));
        Ok(())
    }

    fn evaluate(&self, depth: f64) -> Point {
        if let Some(p) = self.span.pinned(depth) { return p }
        let u = self.span.u(depth);
        Point::new(self.value(0, u), self.value(1, u), depth)
    }

    fn slope(&self, depth: f64) -> (f64, f64) {
        if let Some(s) = self.span.pinned_slope(depth) { return s }
        let u = self.span.u(depth);
        (self.derivative(0, u), self.derivative(1, u))
    }
}
