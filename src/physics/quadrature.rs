//! Numerical integration of the smooth, positive integrands that appear in
//! range and straggling calculations.

use crate::error::{Error, Result};

const MAX_DEPTH: u32 = 48;

/// Adaptive Simpson quadrature of `f` over `[a, b]` to absolute tolerance
/// `eps`. Fails if the integrand produces non-finite values.
pub fn adaptive_simpson(f: impl Fn(f64) -> f64, a: f64, b: f64, eps: f64) -> Result<f64> {
    if a == b { return Ok(0.0) }
    let (fa, fm, fb) = (f(a), f(0.5 * (a + b)), f(b));
    let whole = simpson(a, b, fa, fm, fb);
    let integral = refine(&f, Panel { a, b, fa, fm, fb, whole }, eps, MAX_DEPTH);
    if integral.is_finite() { Ok(integral) }
    else { Err(Error::NumericDivergence(format!("integral over [{a}, {b}] is not finite"))) }
}

#[derive(Clone, Copy)]
struct Panel { a: f64, b: f64, fa: f64, fm: f64, fb: f64, whole: f64 }

fn simpson(a: f64, b: f64, fa: f64, fm: f64, fb: f64) -> f64 {
    (b - a) / 6.0 * (fa + 4.0 * fm + fb)
}

fn refine(f: &impl Fn(f64) -> f64, p: Panel, eps: f64, depth: u32) -> f64 {
    let Panel { a, b, fa, fm, fb, whole } = p;
    let m = 0.5 * (a + b);
    let (fl, fr) = (f(0.5 * (a + m)), f(0.5 * (m + b)));
    let left  = simpson(a, m, fa, fl, fm);
    let right = simpson(m, b, fm, fr, fb);
    let delta = left + right - whole;
    // Non-finite deltas fall through to the final sum and are reported by the caller
    if depth == 0 || !delta.is_finite() || delta.abs() <= 15.0 * eps {
        return left + right + delta / 15.0
    }
    refine(f, Panel { a, b: m, fa, fm: fl, fb: fm, whole: left  }, eps / 2.0, depth - 1) +
    refine(f, Panel { a: m, b, fa: fm, fm: fr, fb, whole: right }, eps / 2.0, depth - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use float_eq::assert_float_eq;

    #[rstest(/**/ a, b, expected,
             case(0.0, 1.0, 2.0 / 3.0),
             case(1.0, 4.0, 14.0 / 3.0),
             case(4.0, 1.0, -14.0 / 3.0),
             case(2.0, 2.0, 0.0),
    )]
    fn integrates_square_root(a: f64, b: f64, expected: f64) {
        let got = adaptive_simpson(f64::sqrt, a, b, 1e-12).unwrap();
        assert_float_eq!(got, expected, abs <= 1e-10);
    }

    #[test]
    fn oscillating_integrand() {
        let got = adaptive_simpson(|x| (10.0 * x).sin(), 0.0, std::f64::consts::PI, 1e-12).unwrap();
        assert_float_eq!(got, 0.0, abs <= 1e-10);
    }

    #[test]
    fn non_finite_integrand_diverges() {
        let got = adaptive_simpson(|x| 1.0 / (x - 0.5), 0.0, 1.0, 1e-9);
        assert!(matches!(got, Err(Error::NumericDivergence(_))));
    }
}
