//! Cubic Hermite approximation of the most likely path: the lowest-degree
//! polynomial matching both boundary positions and both boundary slopes.

use crate::error::Result;
use crate::types::Point;
use super::{Boundary, MostLikelyPath, Span};

#[derive(Clone, Debug, Default)]
pub struct ThirdOrderPolynomial {
    span: Span,
    /// `[c0, c1, c2, c3]` of `x` and `y`, in powers of depth below the entry
    c: [[f64; 4]; 2],
}

impl MostLikelyPath for ThirdOrderPolynomial {

    fn init(&mut self, entry: &Boundary, exit: &Boundary) -> Result<()> {
        let span = Span::new(entry, exit)?;
        let u2 = span.u2;
        self.c = span.axes.map(|e| {
            let delta = e.x2 - e.x0;
            [e.x0,
             e.s0,
             3.0 * delta / (u2 * u2) - (2.0 * e.s0 + e.s2) / u2,
            -2.0 * delta / (u2 * u2 * u2) + (e.s0 + e.s2) / (u2 * u2)]
        });
        self.span = span;
        Ok(())
    }

    fn evaluate(&self, depth: f64) -> Point {
        if let Some(p) = self.span.pinned(depth) { return p }
        let u = self.span.u(depth);
        let [x, y] = self.c.map(|[c0, c1, c2, c3]| ((c3 * u + c2) * u + c1) * u + c0);
        Point::new(x, y, depth)
    }

    fn slope(&self, depth: f64) -> (f64, f64) {
        if let Some(s) = self.span.pinned_slope(depth) { return s }
        let u = self.span.u(depth);
        let [x, y] = self.c.map(|[_, c1, c2, c3]| (3.0 * c3 * u + 2.0 * c2) * u + c1);
        (x, y)
    }
}
