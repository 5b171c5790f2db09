use units::{Energy, Length, mev, mev_, mm, mm_};

use crate::error::{Error, Result};

use super::{Material, Medium, TRANSPORT_CUTOFF};

/// Tabulated CSDA range as a function of kinetic energy, for fast conversion
/// of measured energy losses into water-equivalent path lengths.
///
/// The range is taken as zero below the transport cut-off.
#[derive(Clone, Debug)]
pub struct RangeTable {
    /// Width of the energy bins, MeV
    bin: f64,
    /// `ranges[i]`: range (mm) at `i * bin` MeV
    ranges: Vec<f64>,
}

impl RangeTable {

    pub fn new(material: &Material, max: Energy, bin: Energy) -> Result<Self> {
        let (max, bin) = (mev_(max), mev_(bin));
        if !(bin > 0.0) || !(max > TRANSPORT_CUTOFF) || !max.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "range table needs positive bins and a maximum above {TRANSPORT_CUTOFF} MeV")))
        }
        let medium = Medium::from(material);
        let inverse = |e: f64| 1.0 / medium.checked_stopping_power(e).unwrap_or(f64::NAN);
        let n = (max / bin).ceil() as usize + 1;
        let mut ranges = Vec::with_capacity(n);
        let mut range = 0.0;
        ranges.push(range);
        for i in 1..n {
            let (a, b) = ((i - 1) as f64 * bin, i as f64 * bin);
            if b > TRANSPORT_CUTOFF {
                let a = a.max(TRANSPORT_CUTOFF);
                // Simpson's rule: the bins are narrow and 1/S is smooth
                range += (b - a) / 6.0 * (inverse(a) + 4.0 * inverse(0.5 * (a + b)) + inverse(b));
            }
            if !range.is_finite() {
                return Err(Error::NumericDivergence(format!(
                    "range of {} MeV protons in {} is not finite", b, material.name)))
            }
            ranges.push(range);
        }
        Ok(Self { bin, ranges })
    }

    /// Range table for water, up to 600 MeV, in bins of 10 keV.
    pub fn water() -> Result<Self> {
        Self::new(&Material::water(), mev(600.0), mev(0.01))
    }

    pub fn max_energy(&self) -> f64 { (self.ranges.len() - 1) as f64 * self.bin }

    /// Interpolated range (mm) of a proton of `e` MeV
    pub(crate) fn range_mm(&self, e: f64) -> Result<f64> {
        if !(e > 0.0) || e > self.max_energy() { return Err(Error::InvalidEnergy(e)) }
        let x = e / self.bin;
        let i = (x.floor() as usize).min(self.ranges.len() - 2);
        let t = x - i as f64;
        Ok(self.ranges[i] * (1.0 - t) + self.ranges[i + 1] * t)
    }

    pub fn range(&self, energy: Energy) -> Result<Length> {
        self.range_mm(mev_(energy)).map(mm)
    }

    /// Water-equivalent path length (mm) of a proton entering with `entry` and
    /// leaving with `exit` MeV.
    pub(crate) fn wepl_mm(&self, entry: f64, exit: f64) -> Result<f64> {
        Ok(self.range_mm(entry)? - self.range_mm(exit)?)
    }

    pub fn wepl(&self, entry: Energy, exit: Energy) -> Result<Length> {
        self.wepl_mm(mev_(entry), mev_(exit)).map(mm)
    }

    /// Energy (MeV) of a proton whose residual range is `r` mm: the inverse of
    /// `range_mm`. `None` if `r` is not positive (stopped proton) or beyond
    /// the table.
    pub(crate) fn energy_with_range(&self, r: f64) -> Option<f64> {
        if !(r > 0.0) || r > *self.ranges.last()? { return None }
        let i = self.ranges.partition_point(|&x| x < r).max(1);
        let (r0, r1) = (self.ranges[i - 1], self.ranges[i]);
        let t = (r - r0) / (r1 - r0);
        Some((i as f64 - 1.0 + t) * self.bin)
    }

    /// Energy left after a proton starting with `initial` travels `wepl`
    /// through water. `None` if it stops.
    pub fn energy_after(&self, initial: Energy, wepl: Length) -> Option<Energy> {
        let r = self.range_mm(mev_(initial)).ok()? - mm_(wepl);
        self.energy_with_range(r).map(mev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::path_length_for_energy_loss;
    use float_eq::assert_float_eq;
    use rstest::rstest;

    fn table() -> RangeTable { RangeTable::new(&Material::water(), mev(300.0), mev(0.05)).unwrap() }

    #[rstest(/**/ entry, exit,
             case(200.0, 150.0),
             case(200.0,  50.0),
             case(100.0,  99.0),
             case(230.0,   5.0),
    )]
    fn table_agrees_with_quadrature(entry: f64, exit: f64) {
        let t = table();
        let from_table = mm_(t.wepl(mev(entry), mev(exit)).unwrap());
        let direct = mm_(path_length_for_energy_loss(mev(entry), mev(exit), &Material::water()).unwrap());
        assert_float_eq!(from_table, direct, abs <= 1e-3);
    }

    #[test]
    fn energy_inverts_range() {
        let t = table();
        let e = t.energy_after(mev(200.0), mm(100.0)).unwrap();
        let wepl = mm_(t.wepl(mev(200.0), e).unwrap());
        assert_float_eq!(wepl, 100.0, abs <= 1e-6);
        assert_eq!(t.energy_after(mev(100.0), mm(1000.0)), None);
    }

    #[test]
    fn out_of_table_energies_rejected() {
        let t = table();
        assert!(matches!(t.range(mev(  0.0)), Err(Error::InvalidEnergy(_))));
        assert!(matches!(t.range(mev(301.0)), Err(Error::InvalidEnergy(_))));
    }
}
