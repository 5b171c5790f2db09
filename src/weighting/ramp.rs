use ndarray::{Array1, Axis, Zip};

use crate::error::Result;
use crate::image::{Detector, ProjectionStack};
use crate::types::Sample;
use super::{Weigh, check_stack};

/// Ram-Lak ramp filter, applied by direct convolution along `u` of every
/// detector row.
#[derive(Clone, Debug)]
pub struct RampFilter {
    detector: Detector,
    /// Kernel taps `h[0..nu]`, already multiplied by the pixel spacing. The
    /// kernel is symmetric: `h[-n] = h[n]`.
    kernel: Vec<f64>,
}

impl RampFilter {

    pub fn new(detector: &Detector) -> Self {
        let nu = detector.n[0];
        let du = detector.spacing[0];
        let kernel = (0..nu).map(|n| du * ram_lak(n, du)).collect();
        Self { detector: *detector, kernel }
    }

    /// Filter a single row
    fn filter_row(&self, row: &[f64]) -> Array1<f64> {
        let n = row.len();
        Array1::from_shape_fn(n, |i| {
            row.iter().enumerate()
                .map(|(j, p)| self.kernel[i.abs_diff(j)] * p)
                .sum()
        })
    }
}

/// Spatial-domain Ram-Lak kernel for pixel spacing `du`
fn ram_lak(n: usize, du: f64) -> f64 {
    if n == 0 { 1.0 / (4.0 * du * du) }
    else if n % 2 == 0 { 0.0 }
    else {
        let n = n as f64;
        -1.0 / (std::f64::consts::PI * std::f64::consts::PI * n * n * du * du)
    }
}

impl Weigh for RampFilter {
    fn apply_in_place<T: Sample>(&self, stack: &mut ProjectionStack<T>) -> Result<()> {
        // The filter does not depend on the projection index
        check_stack(stack, &self.detector, usize::MAX)?;
        Zip::from(stack.data.lanes_mut(Axis(3)))
            .par_for_each(|mut lane| {
                let row: Vec<f64> = lane.iter().map(|x| x.as_f64()).collect();
                let filtered = self.filter_row(&row);
                lane.iter_mut().zip(filtered.iter()).for_each(|(x, &f)| *x = T::of(f));
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use units::mm;

    #[test]
    fn constant_rows_nearly_vanish_in_the_middle() {
        let detector = Detector::new((mm(256.0), mm(1.0)), (256, 1)).unwrap();
        let filter = RampFilter::new(&detector);
        let out = filter.apply(&ProjectionStack::from_vec(detector, 0, vec![1.0_f64; 256]).unwrap()).unwrap();
        // The ramp removes the DC component: only the truncated tails of the
        // kernel leave a residue, which is largest at the edges.
        let centre = out.data[[0, 0, 0, 128]];
        let edge   = out.data[[0, 0, 0,   0]];
        assert!(centre.abs() < 0.002, "{centre}");
        assert!(edge > centre);
    }

    #[test]
    fn impulse_response_is_the_kernel() {
        let detector = Detector::new((mm(9.0), mm(2.0)), (9, 2)).unwrap();
        let filter = RampFilter::new(&detector);
        let mut data = vec![0.0_f64; 18];
        data[4] = 1.0;
        let out = filter.apply(&ProjectionStack::from_vec(detector, 0, data).unwrap()).unwrap();
        let row: Vec<f64> = (0..9).map(|i| out.data[[0, 0, 0, i]]).collect();
        let pi2 = std::f64::consts::PI.powi(2);
        assert_float_eq!(row[4], 0.25, abs <= 1e-15);
        assert_float_eq!(row[3], -1.0 / pi2, abs <= 1e-15);
        assert_float_eq!(row[5], -1.0 / pi2, abs <= 1e-15);
        assert_eq!(row[2], 0.0);
        assert_float_eq!(row[1], -1.0 / (9.0 * pi2), abs <= 1e-15);
        // Other row untouched
        assert!((0..9).all(|i| out.data[[0, 0, 1, i]] == 0.0));
    }
}
