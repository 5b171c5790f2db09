//! Energy loss of protons in matter.
//!
//! Stopping power follows the Bethe-Bloch formula without shell or density
//! corrections, which is adequate for therapeutic proton energies in
//! tissue-like materials. Straggling follows Bohr's theory with the
//! relativistic correction. Everything here is a pure function of its
//! arguments: the only cached quantity is the optional `RangeTable`.

mod material;
mod quadrature;
mod range_table;

pub use material::Material;
pub use range_table::RangeTable;
pub use quadrature::adaptive_simpson;

use units::{Energy, Length, mev, mev_, mm, mm_, g_cm3_};

use crate::error::{Error, Result};

/// Proton rest energy, MeV
pub const PROTON_MASS: f64 = 938.272_088_16;

/// Electron rest energy, MeV
pub const ELECTRON_MASS: f64 = 0.510_998_95;

/// `4π N_A r_e² m_e c²`, MeV cm² / mol
const K: f64 = 0.307_075;

/// Protons below this kinetic energy (MeV) are considered stopped: their
/// residual range in water is a few tens of micrometres.
pub const TRANSPORT_CUTOFF: f64 = 1.0;

/// Absolute tolerance (mm) of range integrals
const RANGE_TOLERANCE: f64 = 1e-9;

// ----- Kernels: bare f64, MeV and mm ---------------------------------------------

/// `β²` of a proton with kinetic energy `t` MeV
pub fn beta_squared(t: f64) -> f64 {
    let gamma = 1.0 + t / PROTON_MASS;
    1.0 - 1.0 / (gamma * gamma)
}

/// Material constants of the Bethe-Bloch formula, stripped of units.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Medium {
    /// `K (Z/A) ρ` converted to MeV / mm
    k: f64,
    /// Ionisation potential, MeV
    i: f64,
}

impl From<&Material> for Medium {
    fn from(m: &Material) -> Self {
        Self {
            // Factor 0.1 converts MeV/cm to MeV/mm
            k: 0.1 * K * m.z_over_a * g_cm3_(m.density),
            i: mev_(m.ionisation_potential),
        }
    }
}

impl Medium {

    /// Stopping power (MeV/mm) at kinetic energy `t` (MeV). Not checked: may be
    /// non-positive or NaN outside the domain of the formula.
    pub(crate) fn stopping_power(&self, t: f64) -> f64 {
        let b2 = beta_squared(t);
        let bracket = (2.0 * ELECTRON_MASS * b2 / (1.0 - b2) / self.i).ln() - b2;
        self.k / b2 * bracket
    }

    pub(crate) fn checked_stopping_power(&self, t: f64) -> Result<f64> {
        if !(t > 0.0) || !t.is_finite() { return Err(Error::InvalidEnergy(t)) }
        let s = self.stopping_power(t);
        if s > 0.0 && s.is_finite() { Ok(s) }
        else { Err(Error::InvalidEnergy(t)) }
    }

    /// Rate of growth of the energy-loss variance, MeV² / mm
    pub(crate) fn straggling(&self, t: f64) -> f64 {
        let b2 = beta_squared(t);
        self.k * ELECTRON_MASS * (1.0 - b2 / 2.0) / (1.0 - b2)
    }

    /// Distance (mm) over which the energy falls from `e0` to `e1`.
    pub(crate) fn path_length(&self, e0: f64, e1: f64) -> Result<f64> {
        adaptive_simpson(|e| 1.0 / self.stopping_power(e), e1, e0, RANGE_TOLERANCE)
    }

    /// Energy (MeV) left after travelling `r` mm, starting with `e0` MeV.
    ///
    /// Safeguarded Newton iteration on `g(E) = path_length(e0, E) - r`, which
    /// decreases monotonically in `E` with derivative `-1/S(E)`.
    pub(crate) fn energy_after(&self, e0: f64, r: f64) -> Result<f64> {
        if r == 0.0 { return Ok(e0) }
        let full_range = self.path_length(e0, TRANSPORT_CUTOFF)?;
        if r >= full_range {
            return Err(Error::NumericDivergence(format!(
                "proton of {e0} MeV stops after {full_range:.3} mm, before travelling {r} mm")))
        }
        let (mut lo, mut hi) = (TRANSPORT_CUTOFF, e0);
        let mut e = (e0 - r * self.stopping_power(e0)).clamp(lo, hi);
        for _ in 0..MAX_NEWTON_ITERATIONS {
            let g = self.path_length(e0, e)? - r;
            if g.abs() <= NEWTON_TOLERANCE * (1.0 + r) { return Ok(e) }
            if g > 0.0 { lo = e } else { hi = e }
            let newton = e + g * self.stopping_power(e);
            e = if newton > lo && newton < hi { newton } else { 0.5 * (lo + hi) };
            if hi - lo <= f64::EPSILON * hi { return Ok(e) }
        }
        Err(Error::NumericDivergence(format!(
            "energy after {r} mm from {e0} MeV did not converge")))
    }
}

const MAX_NEWTON_ITERATIONS: usize = 100;
const NEWTON_TOLERANCE: f64 = 1e-10;

// ----- Public interface, with units ------------------------------------------------

fn positive_energy(e: Energy) -> Result<f64> {
    let e = mev_(e);
    if e > 0.0 && e.is_finite() { Ok(e) } else { Err(Error::InvalidEnergy(e)) }
}

/// Energy lost per unit path length (MeV/mm) by a proton of kinetic energy
/// `energy` in `material`.
pub fn stopping_power(energy: Energy, material: &Material) -> Result<f64> {
    Medium::from(material).checked_stopping_power(positive_energy(energy)?)
}

/// Growth rate of the energy-loss variance (MeV²/mm) of a proton of kinetic
/// energy `energy` in `material`.
pub fn straggling(energy: Energy, material: &Material) -> Result<f64> {
    Ok(Medium::from(material).straggling(positive_energy(energy)?))
}

/// Kinetic energy after a proton starting with `initial` travels
/// `path_length` through `material`. Fails with `NumericDivergence` if the
/// proton stops first.
pub fn energy_after_path_length(initial: Energy, path_length: Length, material: &Material) -> Result<Energy> {
    let medium = Medium::from(material);
    let e0 = positive_energy(initial)?;
    medium.checked_stopping_power(e0)?;
    let r = mm_(path_length);
    if !(r >= 0.0) || !r.is_finite() {
        return Err(Error::NumericDivergence(format!("path length must be non-negative, not {r} mm")))
    }
    medium.energy_after(e0, r).map(mev)
}

/// Path length over which a proton slows down from `initial` to `last` in
/// `material`: the inverse of `energy_after_path_length`.
pub fn path_length_for_energy_loss(initial: Energy, last: Energy, material: &Material) -> Result<Length> {
    let medium = Medium::from(material);
    let (e0, e1) = (positive_energy(initial)?, positive_energy(last)?);
    if e1 > e0 { return Err(Error::InvalidEnergy(e1)) }
    medium.checked_stopping_power(e1)?;
    medium.path_length(e0, e1).map(mm)
}

/// Variance (MeV²) of the energy lost by a proton starting at `initial` after
/// travelling `path_length` through `material`.
pub fn energy_loss_variance(initial: Energy, path_length: Length, material: &Material) -> Result<f64> {
    let medium = Medium::from(material);
    let e0 = mev_(initial);
    let e1 = mev_(energy_after_path_length(initial, path_length, material)?);
    // dσ²/dx dx = dσ²/dx / S dE
    adaptive_simpson(|e| medium.straggling(e) / medium.stopping_power(e), e1, e0, 1e-12)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use proptest::prelude::*;
    use float_eq::assert_float_eq;
    use units::{ev, kev};

    // Reference values for water (PSTAR electronic stopping power, MeV cm²/g):
    // Bethe-Bloch without corrections agrees to about one percent above 10 MeV.
    #[rstest(/**/ energy, pstar,
             case( 10.0, 45.67),
             case( 50.0, 12.45),
             case(100.0,  7.289),
             case(200.0,  4.492),
    )]
    fn water_stopping_power_close_to_pstar(energy: f64, pstar: f64) {
        let s = stopping_power(mev(energy), &Material::water()).unwrap();
        // MeV/mm to MeV cm²/g at 1 g/cm³
        assert_float_eq!(s * 10.0, pstar, rel <= 0.015);
    }

    #[rstest(/**/ energy,
             case(0.0),
             case(-5.0),
             case(f64::NAN),
    )]
    fn non_positive_energy_rejected(energy: f64) {
        assert!(matches!(stopping_power(mev(energy), &Material::water()), Err(Error::InvalidEnergy(_))));
    }

    #[test]
    fn energy_below_formula_domain_rejected() {
        // ln(2 mₑc² β²γ² / I) < 0 for a 10 keV proton in water
        assert!(matches!(stopping_power(kev(10.0), &Material::water()), Err(Error::InvalidEnergy(_))));
    }

    #[test]
    fn water_csda_range_close_to_pstar() {
        // PSTAR CSDA range of 200 MeV protons in water: 25.96 cm
        let r = path_length_for_energy_loss(mev(200.0), mev(TRANSPORT_CUTOFF), &Material::water()).unwrap();
        assert_float_eq!(mm_(r), 259.6, rel <= 0.01);
    }

    #[test]
    fn stopped_proton_diverges() {
        let got = energy_after_path_length(mev(100.0), mm(500.0), &Material::water());
        assert!(matches!(got, Err(Error::NumericDivergence(_))));
    }

    #[test]
    fn energy_decreases_with_path_length() {
        let water = Material::water();
        let energies: Vec<f64> = [0.0, 10.0, 50.0, 100.0, 200.0].iter()
            .map(|&r| mev_(energy_after_path_length(mev(200.0), mm(r), &water).unwrap()))
            .collect();
        assert_eq!(energies[0], 200.0);
        assert!(energies.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn higher_ionisation_potential_stops_less() {
        let low  = Material::water_with_ionisation_potential(ev(68.0)).unwrap();
        let high = Material::water_with_ionisation_potential(ev(80.0)).unwrap();
        assert!(stopping_power(mev(100.0), &high).unwrap() < stopping_power(mev(100.0), &low).unwrap());
    }

    #[test]
    fn straggling_variance_grows_with_depth() {
        let water = Material::water();
        let shallow = energy_loss_variance(mev(200.0), mm( 50.0), &water).unwrap();
        let deep    = energy_loss_variance(mev(200.0), mm(200.0), &water).unwrap();
        assert!(shallow > 0.0 && deep > shallow);
        // Bohr's estimate for 200 MeV protons crossing 20 cm of water is about 2 MeV²
        assert!(deep > 0.5 && deep < 3.0, "variance {deep}");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]
        #[test]
        fn path_length_roundtrip(
            e0 in  20.0..(300.0 as f64),
            f  in   0.0..(  0.95 as f64),
        ) {
            let water = Material::water();
            let range = mm_(path_length_for_energy_loss(mev(e0), mev(TRANSPORT_CUTOFF), &water).unwrap());
            let r = f * range;
            let e1 = energy_after_path_length(mev(e0), mm(r), &water).unwrap();
            let back = mm_(path_length_for_energy_loss(mev(e0), e1, &water).unwrap());
            prop_assert!((back - r).abs() <= 1e-6 * (1.0 + r), "{back} vs {r}");
        }
    }
}
