//! Proton pairs: one measured traversal of the object per proton.
//!
//! Entry and exit are measured by trackers upstream and downstream of the
//! object. Outside the object hull protons travel in straight lines along the
//! measured directions; inside it they follow the most likely path.
//!
//! Pairs are accumulated either into depth-resolved projections
//! (`PairProjector`) or into volumes (`PairBackProjector`). Degenerate pairs are
//! skipped and counted in a `Tally`, never fatal.

mod projection;
mod backprojection;

pub use projection::{PairProjector, PairProjectionConfig, PairProjection, Bins};
pub use backprojection::{PairBackProjector, PairBackProjectionConfig, PairBackProjection, Sums};

use std::collections::BTreeMap;
use std::fmt;

use geometry::{Hull, rotate_about_y, rotate_vector_about_y};

use crate::error::{Error, PairDefect};
use crate::mlp::{Boundary, Mlp, MostLikelyPath};
use crate::physics::RangeTable;
use crate::types::{Point, Vector};

/// What was measured of the proton's energy loss.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Measurement {
    /// Kinetic energies (MeV) at entry and exit trackers
    Energies { entry: f64, exit: f64 },
    /// Water-equivalent path length (mm), already converted
    Wepl(f64),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProtonPair {
    pub entry: Point,
    pub entry_direction: Vector,
    pub exit: Point,
    pub exit_direction: Vector,
    pub measurement: Measurement,
}

impl ProtonPair {

    /// Check the invariants which every estimator relies on.
    pub fn validate(&self) -> Result<(), PairDefect> {
        let finite = self.entry.iter()
            .chain(self.exit.iter())
            .chain(self.entry_direction.iter())
            .chain(self.exit_direction.iter())
            .all(|c| c.is_finite());
        let measurement_finite = match self.measurement {
            Measurement::Energies { entry, exit } => entry.is_finite() && exit.is_finite(),
            Measurement::Wepl(w) => w.is_finite(),
        };
        if !(finite && measurement_finite) { return Err(PairDefect::NonFinite) }
        if self.entry_direction.norm() == 0.0 || self.exit_direction.norm() == 0.0 {
            return Err(PairDefect::ZeroDirection)
        }
        if self.entry == self.exit { return Err(PairDefect::CoincidentEndpoints) }
        if !(self.entry_direction.z > 0.0 && self.exit_direction.z > 0.0 && self.exit.z > self.entry.z) {
            return Err(PairDefect::Backwards)
        }
        match self.measurement {
            Measurement::Energies { entry, exit } if !(exit < entry) => Err(PairDefect::NoEnergyLoss),
            Measurement::Wepl(w) if w < 0.0 => Err(PairDefect::NoEnergyLoss),
            _ => Ok(()),
        }
    }

    /// Water-equivalent path length (mm) of the traversal
    pub fn wepl(&self, ranges: &RangeTable) -> crate::Result<f64> {
        match self.measurement {
            Measurement::Energies { entry, exit } => ranges.wepl_mm(entry, exit),
            Measurement::Wepl(w) => Ok(w),
        }
    }

    /// Angles (radians) between entry and exit directions, projected onto the
    /// `xz` and `yz` planes.
    pub fn scattering_angles(&self) -> (f64, f64) {
        let angle = |a: [f64; 2], b: [f64; 2]| {
            let cos = (a[0] * b[0] + a[1] * b[1]) / (a[0].hypot(a[1]) * b[0].hypot(b[1]));
            cos.min(1.0).acos()
        };
        let (i, o) = (self.entry_direction, self.exit_direction);
        (angle([i.x, i.z], [o.x, o.z]), angle([i.y, i.z], [o.y, o.z]))
    }

    /// The same pair seen from a frame rotated about the gantry axis by
    /// `angle` radians.
    pub fn rotated(&self, angle: f64) -> Self {
        Self {
            entry:           rotate_about_y       (self.entry          , angle),
            exit:            rotate_about_y       (self.exit           , angle),
            entry_direction: rotate_vector_about_y(self.entry_direction, angle),
            exit_direction:  rotate_vector_about_y(self.exit_direction , angle),
            measurement: self.measurement,
        }
    }
}

// ----- Tracks --------------------------------------------------------------------

/// Boundary conditions of a proton on the object hull.
#[derive(Clone, Copy, Debug)]
pub struct Track {
    pub entry: Boundary,
    pub exit: Boundary,
}

impl Track {

    /// Move the measured points along the tracker lines onto `hull`. If the
    /// tracker lines miss the hull, the path joins the measured points.
    pub fn new(pair: &ProtonPair, hull: Option<&Hull>) -> Self {
        let measured = Self {
            entry: Boundary::at(pair.entry, pair.entry_direction),
            exit:  Boundary::at(pair.exit , pair.exit_direction ),
        };
        let Some(hull) = hull else { return measured };
        match hull.surface_points(pair.entry, pair.entry_direction, pair.exit, pair.exit_direction) {
            Some((a, b)) if a.z < b.z => Self {
                entry: Boundary::at(a, pair.entry_direction).with_tracker_distance((a - pair.entry).norm()),
                exit:  Boundary::at(b, pair.exit_direction ).with_tracker_distance((pair.exit - b).norm()),
            },
            _ => measured,
        }
    }

    /// Position at depth `z`: straight lines before the entry and after the
    /// exit boundaries, `mlp` (already initialized with this track) between.
    pub fn position(&self, mlp: &impl MostLikelyPath, z: f64) -> Point {
        if      z <= self.entry.depth { straight(&self.entry, z) }
        else if z >= self.exit .depth { straight(&self.exit , z) }
        else                          { mlp.evaluate(z) }
    }
}

fn straight(b: &Boundary, z: f64) -> Point {
    b.position + b.direction * ((z - b.depth) / b.direction.z)
}

/// Validate `pair`, find its WEPL and prepare `mlp` to trace it.
pub(crate) fn prepare(
    pair: &ProtonPair,
    hull: Option<&Hull>,
    ranges: &RangeTable,
    mlp: &mut Mlp,
) -> Result<(Track, f64), Reject> {
    pair.validate().map_err(Reject::Invalid)?;
    let wepl = pair.wepl(ranges).map_err(Reject::classify)?;
    let track = Track::new(pair, hull);
    mlp.init(&track.entry, &track.exit).map_err(Reject::classify)?;
    Ok((track, wepl))
}

// ----- Accounting ----------------------------------------------------------------

/// Why a pair was skipped
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reject {
    Invalid(PairDefect),
    /// Energy outside the range of the WEPL conversion
    Energy,
    /// Non-finite path estimate
    Divergence,
}

impl Reject {
    pub(crate) fn classify(error: Error) -> Self {
        match error {
            Error::InvalidPair(defect) => Reject::Invalid(defect),
            Error::InvalidEnergy(_)    => Reject::Energy,
            // Anything else going wrong with a single pair is numerical
            _                          => Reject::Divergence,
        }
    }
}

impl fmt::Display for Reject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reject::Invalid(defect) => write!(f, "{defect}"),
            Reject::Energy          => write!(f, "energy out of range"),
            Reject::Divergence      => write!(f, "numeric divergence"),
        }
    }
}

/// Numbers of pairs accumulated and skipped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub processed: usize,
    pub rejected: BTreeMap<Reject, usize>,
}

impl Tally {

    pub fn accept(&mut self) { self.processed += 1 }

    pub fn reject(&mut self, why: Reject) { *self.rejected.entry(why).or_insert(0) += 1 }

    pub fn record<T>(&mut self, outcome: &Result<T, Reject>) {
        match outcome {
            Ok(_)    => self.accept(),
            Err(why) => self.reject(*why),
        }
    }

    pub fn rejected_total(&self) -> usize { self.rejected.values().sum() }

    pub fn merge(mut self, other: Tally) -> Tally {
        self.processed += other.processed;
        for (why, n) in other.rejected {
            *self.rejected.entry(why).or_insert(0) += n;
        }
        self
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use crate::utils::group_digits as g;
        write!(f, "{} pairs processed, {} rejected", g(self.processed), g(self.rejected_total()))?;
        for (why, n) in &self.rejected {
            write!(f, "\n    {:>12}  {why}", g(*n))?;
        }
        Ok(())
    }
}

/// Number of pairs handed to each rayon job
pub(crate) fn job_size(n: usize) -> usize {
    (n / rayon::current_num_threads()).max(1)
}
