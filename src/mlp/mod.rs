//! Most likely paths of protons between their measured entry and exit.
//!
//! Every estimator works in the beam frame: depth is the `z` coordinate and
//! the transverse coordinates `x` and `y` are fitted independently as
//! functions of depth. Directions enter the fits as slopes `dx/dz` and
//! `dy/dz`, so the derivative of each fitted curve matches the measured
//! directions at the boundaries.

mod polynomial;
mod schulte;
mod third_order;

pub use polynomial::Polynomial;
pub use schulte::{Schulte, TrackerUncertainty};
pub use third_order::ThirdOrderPolynomial;

use serde::Deserialize;

use crate::error::{PairDefect, Result};
use crate::types::{Point, Vector};

/// Position and direction of a proton where it enters or leaves the object.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boundary {
    pub position: Point,
    pub direction: Vector,
    /// Depth (beam-axis coordinate) at which the boundary conditions apply
    pub depth: f64,
    /// Distance (mm) between the tracker which measured this boundary and
    /// the boundary itself. Only the Schulte estimator with tracker
    /// uncertainties uses it.
    pub tracker_distance: f64,
}

impl Boundary {

    /// Boundary conditions at `position`, measured right there.
    pub fn at(position: Point, direction: Vector) -> Self {
        Self { position, direction, depth: position.z, tracker_distance: 0.0 }
    }

    pub fn with_tracker_distance(self, tracker_distance: f64) -> Self {
        Self { tracker_distance, ..self }
    }

    fn check(&self) -> std::result::Result<(), PairDefect> {
        let finite = self.position.iter()
            .chain(self.direction.iter())
            .chain([self.depth, self.tracker_distance].iter())
            .all(|c| c.is_finite());
        if !finite                       { return Err(PairDefect::NonFinite) }
        if self.direction.norm() == 0.0  { return Err(PairDefect::ZeroDirection) }
        if !(self.direction.z > 0.0)     { return Err(PairDefect::Backwards) }
        Ok(())
    }

    /// Transverse slopes `[dx/dz, dy/dz]`
    fn slopes(&self) -> [f64; 2] {
        [self.direction.x / self.direction.z, self.direction.y / self.direction.z]
    }
}

/// Capability shared by all path estimators.
pub trait MostLikelyPath {

    /// Store the boundary conditions of a new proton. Fails with
    /// `InvalidPair` if they are degenerate: non-finite, zero-length or
    /// backwards directions, exit not deeper than entry.
    fn init(&mut self, entry: &Boundary, exit: &Boundary) -> Result<()>;

    /// Estimated position at `depth`.
    ///
    /// At the entry and exit depths the stored boundary positions are returned
    /// unchanged. Other depths, including those outside the boundaries, are
    /// evaluated on the fitted curve, with one exception: `Schulte` has no
    /// curve beyond the boundaries and continues along the boundary
    /// tangents there.
    fn evaluate(&self, depth: f64) -> Point;

    /// Estimated transverse slopes `(dx/dz, dy/dz)` at `depth`.
    fn slope(&self, depth: f64) -> (f64, f64);

    /// Estimated positions at each of `depths`, in the same order.
    fn evaluate_all(&self, depths: &[f64]) -> Vec<Point> {
        depths.iter().map(|&depth| self.evaluate(depth)).collect()
    }
}

/// Choice of path estimator, as written in configuration files.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum MlpKind {
    Schulte {
        #[serde(default)]
        tracker: Option<TrackerUncertainty>,
    },
    Polynomial { degree: usize },
    ThirdOrderPolynomial,
}

impl Default for MlpKind {
    fn default() -> Self { MlpKind::Schulte { tracker: None } }
}

/// A path estimator selected at configuration time.
#[derive(Clone, Debug)]
pub enum Mlp {
    Schulte(Schulte),
    Polynomial(Polynomial),
    ThirdOrderPolynomial(ThirdOrderPolynomial),
}

impl Mlp {
    /// Fails with `UnsupportedDegree` for polynomial degrees without
    /// tabulated coefficients.
    pub fn new(kind: MlpKind) -> Result<Self> {
        Ok(match kind {
            MlpKind::Schulte { tracker }   => Mlp::Schulte(Schulte::new(tracker)?),
            MlpKind::Polynomial { degree } => Mlp::Polynomial(Polynomial::new(degree)?),
            MlpKind::ThirdOrderPolynomial  => Mlp::ThirdOrderPolynomial(ThirdOrderPolynomial::default()),
        })
    }
}

impl MostLikelyPath for Mlp {
    fn init(&mut self, entry: &Boundary, exit: &Boundary) -> Result<()> {
        match self {
            Mlp::Schulte(m)              => m.init(entry, exit),
            Mlp::Polynomial(m)           => m.init(entry, exit),
            Mlp::ThirdOrderPolynomial(m) => m.init(entry, exit),
        }
    }

    fn evaluate(&self, depth: f64) -> Point {
        match self {
            Mlp::Schulte(m)              => m.evaluate(depth),
            Mlp::Polynomial(m)           => m.evaluate(depth),
            Mlp::ThirdOrderPolynomial(m) => m.evaluate(depth),
        }
    }

    fn slope(&self, depth: f64) -> (f64, f64) {
        match self {
            Mlp::Schulte(m)              => m.slope(depth),
            Mlp::Polynomial(m)           => m.slope(depth),
            Mlp::ThirdOrderPolynomial(m) => m.slope(depth),
        }
    }
}

// ----- Shared by the estimators ---------------------------------------------------

/// Boundary conditions of one transverse axis, relative to the entry depth.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct AxisEnds {
    x0: f64,
    s0: f64,
    x2: f64,
    s2: f64,
}

/// Validated boundary conditions of the current proton.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Span {
    entry: Boundary,
    exit: Boundary,
    /// Depth of exit relative to entry
    u2: f64,
    axes: [AxisEnds; 2],
}

impl Default for Span {
    // Before the first `init` every evaluation is NaN.
    fn default() -> Self {
        let nan = Boundary::at(Point::new(f64::NAN, f64::NAN, f64::NAN), Vector::new(f64::NAN, f64::NAN, f64::NAN));
        let nan_axis = AxisEnds { x0: f64::NAN, s0: f64::NAN, x2: f64::NAN, s2: f64::NAN };
        Self { entry: nan, exit: nan, u2: f64::NAN, axes: [nan_axis; 2] }
    }
}

impl Span {

    fn new(entry: &Boundary, exit: &Boundary) -> Result<Self> {
        entry.check()?;
        exit .check()?;
        let u2 = exit.depth - entry.depth;
        if u2 == 0.0     { return Err(PairDefect::CoincidentEndpoints.into()) }
        if !(u2 > 0.0)   { return Err(PairDefect::Backwards.into()) }
        let (si, so) = (entry.slopes(), exit.slopes());
        let axes = [0, 1].map(|d| AxisEnds {
            x0: entry.position[d], s0: si[d],
            x2: exit .position[d], s2: so[d],
        });
        Ok(Self { entry: *entry, exit: *exit, u2, axes })
    }

    /// The stored boundary position, if `depth` is one of the boundary depths.
    fn pinned(&self, depth: f64) -> Option<Point> {
        if depth == self.entry.depth { Some(self.entry.position) }
        else if depth == self.exit.depth { Some(self.exit.position) }
        else { None }
    }

    /// The stored boundary slopes, if `depth` is one of the boundary depths.
    fn pinned_slope(&self, depth: f64) -> Option<(f64, f64)> {
        let s = |b: &Boundary| { let [x, y] = b.slopes(); (x, y) };
        if depth == self.entry.depth { Some(s(&self.entry)) }
        else if depth == self.exit.depth { Some(s(&self.exit)) }
        else { None }
    }

    fn u(&self, depth: f64) -> f64 { depth - self.entry.depth }
}
