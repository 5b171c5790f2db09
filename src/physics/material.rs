use units::{Energy, MassDensity, ev, g_cm3, g_cm3_, mev_};

use crate::error::{Error, Result};

const WATER_Z_OVER_A: f64 = 0.555087;

/// The properties of a medium that enter the Bethe-Bloch formula.
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,

    /// Ratio of atomic number to atomic mass, mol/g
    pub z_over_a: f64,

    pub density: MassDensity,

    /// Mean excitation energy `I`
    pub ionisation_potential: Energy,
}

impl Material {

    pub fn water() -> Self {
        Self { name: "water".into(), z_over_a: WATER_Z_OVER_A, density: g_cm3(1.0), ionisation_potential: ev(75.0) }
    }

    /// Water with a different mean excitation energy
    pub fn water_with_ionisation_potential(i: Energy) -> Result<Self> {
        Self::custom("water", WATER_Z_OVER_A, g_cm3(1.0), i)
    }

    pub fn custom(name: &str, z_over_a: f64, density: MassDensity, ionisation_potential: Energy) -> Result<Self> {
        let ok = |x: f64| x > 0.0 && x.is_finite();
        if !(ok(z_over_a) && ok(g_cm3_(density)) && ok(mev_(ionisation_potential))) {
            return Err(Error::InvalidConfig(format!(
                "material `{name}` needs positive Z/A, density and ionisation potential")))
        }
        Ok(Self { name: name.into(), z_over_a, density, ionisation_potential })
    }

    /// Electron density relative to water
    pub fn relative_electron_density(&self) -> f64 {
        self.z_over_a * g_cm3_(self.density) / WATER_Z_OVER_A
    }
}
