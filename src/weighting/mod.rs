//! Per-pixel weighting and filtering of projections before back-projection.
//!
//! Every step depends only on the projection's own geometry and pixels, so a
//! series may be weighted in chunks of any size with identical results.

mod fdk;
mod parker;
mod ramp;

pub use fdk::FdkWeights;
pub use parker::Parker;
pub use ramp::RampFilter;

use ndarray::{ArrayViewMut3, Axis};
use ndarray::parallel::prelude::*;

use crate::circular::{CircularGeometry, ProjectionFrame};
use crate::error::{Error, Result};
use crate::image::{Detector, ProjectionStack};
use crate::types::Sample;

/// A transformation of projections which can mutate its input or produce a
/// new stack: callers choose explicitly.
pub trait Weigh {

    fn apply_in_place<T: Sample>(&self, stack: &mut ProjectionStack<T>) -> Result<()>;

    fn apply<T: Sample>(&self, stack: &ProjectionStack<T>) -> Result<ProjectionStack<T>> {
        let mut out = stack.clone();
        self.apply_in_place(&mut out)?;
        Ok(out)
    }
}

/// One step of a `Weighting` pipeline.
#[derive(Clone, Debug)]
pub enum Step {
    Fdk(FdkWeights),
    Parker(Parker),
    Ramp(RampFilter),
}

impl Weigh for Step {
    fn apply_in_place<T: Sample>(&self, stack: &mut ProjectionStack<T>) -> Result<()> {
        match self {
            Step::Fdk(w)    => w.apply_in_place(stack),
            Step::Parker(w) => w.apply_in_place(stack),
            Step::Ramp(w)   => w.apply_in_place(stack),
        }
    }
}

/// Steps applied in order.
#[derive(Clone, Debug, Default)]
pub struct Weighting {
    steps: Vec<Step>,
}

impl Weighting {

    pub fn new(steps: Vec<Step>) -> Self { Self { steps } }

    /// The usual FDK preprocessing: Parker redundancy weights (identity unless
    /// the geometry is a short scan), cosine and angular weights, ramp filter.
    pub fn fdk(geometry: &CircularGeometry, detector: &Detector) -> Self {
        Self::new(vec![
            Step::Parker(Parker::new(geometry, detector)),
            Step::Fdk(FdkWeights::new(geometry, detector)),
            Step::Ramp(RampFilter::new(detector)),
        ])
    }

    pub fn steps(&self) -> &[Step] { &self.steps }
}

impl Weigh for Weighting {
    fn apply_in_place<T: Sample>(&self, stack: &mut ProjectionStack<T>) -> Result<()> {
        for step in &self.steps { step.apply_in_place(stack)? }
        Ok(())
    }
}

// ----- Shared helpers ------------------------------------------------------------

/// Fail unless `stack` was acquired with `detector` and lies within a series
/// of `count` projections.
fn check_stack<T>(stack: &ProjectionStack<T>, detector: &Detector, count: usize) -> Result<()>
where
    T: Sample,
{
    if stack.detector.n != detector.n {
        return Err(Error::InvalidConfig(format!(
            "projections of {:?} pixels given to weights for {:?} pixels", stack.detector.n, detector.n)))
    }
    let end = stack.indices().end;
    if end > count {
        return Err(Error::IndexOutOfRange { index: end - 1, count })
    }
    Ok(())
}

/// Multiply every pixel of every projection in `stack` by
/// `weight(frame, u, v)`, the same for all depth planes.
fn weigh_pixels<T, W>(stack: &mut ProjectionStack<T>, frames: &[ProjectionFrame], weight: W)
where
    T: Sample,
    W: Fn(usize, &ProjectionFrame, f64, f64) -> f64 + Sync,
{
    let first = stack.first;
    let detector = stack.detector;
    stack.data
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(j, projection)| {
            let i = first + j;
            weigh_projection(projection, &detector, |u, v| weight(i, &frames[i], u, v));
        });
}

fn weigh_projection<T: Sample>(mut projection: ArrayViewMut3<T>, detector: &Detector, weight: impl Fn(f64, f64) -> f64) {
    let [nu, nv, _] = detector.n;
    for iv in 0..nv {
        let v = detector.v(iv);
        for iu in 0..nu {
            let w = T::of(weight(detector.u(iu), v));
            projection
                .slice_mut(ndarray::s![.., iv, iu])
                .mapv_inplace(|x| x * w);
        }
    }
}
