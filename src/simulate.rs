//! Synthetic proton pairs through a water cylinder whose axis is the gantry
//! rotation axis (`y`).
//!
//! Protons travel in straight lines from the entry tracker. Their energy loss
//! comes from the water chord they cross; multiple scattering is folded into
//! a single Highland-sized kink at the isocentre plane. Good enough to
//! exercise the reconstruction; not a transport code.

use geometry::cylinder_chord_length;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use units::{Angle, Energy, Length, mev_, mm_, radian_};

use crate::error::{Error, Result};
use crate::pairs::{Measurement, ProtonPair};
use crate::physics::{PROTON_MASS, RangeTable};
use crate::types::{Point, Vector};

/// Radiation length of water, mm
const WATER_RADIATION_LENGTH: f64 = 361.0;

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Beam {
    #[serde(deserialize_with = "crate::config::deserialize_uom")]
    pub energy: Energy,

    /// Standard deviation of the transverse positions at the entry tracker
    #[serde(deserialize_with = "crate::config::deserialize_uom")]
    pub spot_size: Length,

    /// Standard deviation of the angles between the beam axis and the
    /// protons' entry directions
    #[serde(deserialize_with = "crate::config::deserialize_uom")]
    pub divergence: Angle,

    /// The trackers sit at `z = ±tracker_distance`
    #[serde(deserialize_with = "crate::config::deserialize_uom")]
    pub tracker_distance: Length,
}

/// Synthetic acquisition of a water cylinder
#[derive(Clone, Debug)]
pub struct Simulation {
    beam: Beam,
    radius: f64,
    scattering: bool,
}

impl Simulation {

    pub fn new(beam: Beam, radius: Length) -> Result<Self> {
        let ok = |x: f64| x >= 0.0 && x.is_finite();
        let (e, s, d, t, r) = (mev_(beam.energy), mm_(beam.spot_size), radian_(beam.divergence),
                               mm_(beam.tracker_distance), mm_(radius));
        if !(e > 0.0 && ok(s) && ok(d) && ok(r) && t > r && t.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "simulation needs positive energy, non-negative spreads and trackers outside the cylinder: {beam:?}, radius {r} mm")))
        }
        Ok(Self { beam, radius: r, scattering: true })
    }

    /// Switch the scattering kink on or off
    pub fn with_scattering(self, scattering: bool) -> Self { Self { scattering, ..self } }

    /// Generate up to `n` pairs reproducibly from `seed`. Protons which stop
    /// in the water are lost, so fewer than `n` pairs may be returned.
    /// Protons which miss the cylinder lose no energy and are recorded with a
    /// WEPL of 0; all others with their entry and exit energies.
    pub fn pairs(&self, ranges: &RangeTable, n: usize, seed: u64) -> Result<Vec<ProtonPair>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = |sigma: f64| Normal::new(0.0, sigma)
            .map_err(|e| Error::InvalidConfig(e.to_string()));
        let position   = normal(mm_(self.beam.spot_size))?;
        let divergence = normal(radian_(self.beam.divergence))?;
        let unit       = normal(1.0)?;
        let e0 = mev_(self.beam.energy);
        let l = mm_(self.beam.tracker_distance);

        let mut pairs = Vec::with_capacity(n);
        for _ in 0..n {
            let entry = Point::new(position.sample(&mut rng), position.sample(&mut rng), -l);
            let entry_direction = Vector::new(divergence.sample(&mut rng), divergence.sample(&mut rng), 1.0);
            let straight = entry + entry_direction * 2.0 * l;
            let chord = cylinder_chord_length(entry, straight, self.radius);
            // Always draw the kink, so that the sequence of random numbers
            // does not depend on the geometry
            let (kx, ky) = (unit.sample(&mut rng), unit.sample(&mut rng));

            if chord <= 0.0 {
                pairs.push(ProtonPair {
                    entry, entry_direction,
                    exit: straight, exit_direction: entry_direction,
                    measurement: Measurement::Wepl(0.0),
                });
                continue
            }
            let Some(e1) = ranges.range_mm(e0).ok().and_then(|r| ranges.energy_with_range(r - chord)) else { continue };
            let theta = if self.scattering { highland(chord, e0, e1) } else { 0.0 };
            let kink = Vector::new(kx * theta, ky * theta, 0.0);
            pairs.push(ProtonPair {
                entry, entry_direction,
                exit: straight + kink * l,
                exit_direction: entry_direction + kink,
                measurement: Measurement::Energies { entry: e0, exit: e1 },
            });
        }
        Ok(pairs)
    }
}

/// RMS projected scattering angle (radians) after `x` mm of water, for a
/// proton slowing from `e0` to `e1` MeV.
fn highland(x: f64, e0: f64, e1: f64) -> f64 {
    let t = 0.5 * (e0 + e1);
    let beta_p = t * (t + 2.0 * PROTON_MASS) / (t + PROTON_MASS);
    let s = x / WATER_RADIATION_LENGTH;
    (13.6 / beta_p * s.sqrt() * (1.0 + 0.038 * s.ln())).max(0.0)
}
