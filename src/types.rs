pub use geometry::{Point, Vector};

#[allow(nonstandard_style)] pub type Index3_u = [usize; 3];

/// Bound on the sample types of projections and volumes: `f32` and `f64`.
pub trait Sample:
    num_traits::Float
    + num_traits::FromPrimitive
    + std::ops::AddAssign
    + std::iter::Sum
    + std::fmt::Debug
    + Default
    + Send
    + Sync
    + 'static
{
    /// Lossy conversion from the `f64` in which the kernels compute.
    fn of(x: f64) -> Self { Self::from_f64(x).unwrap_or_else(Self::nan) }

    /// Widening conversion into `f64`.
    fn as_f64(self) -> f64 { self.to_f64().unwrap_or(f64::NAN) }
}

impl Sample for f32 {}
impl Sample for f64 {}
