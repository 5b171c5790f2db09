//! Configuration of reconstructions from projection series or proton pairs

use std::fs;
use std::path::Path;

use geometry::{Hull, Vector};
use serde::Deserialize;
use units::{Angle, Energy, Length, MassDensity, ev, g_cm3, mev, mm, mm_, radian};

use crate::circular::CircularGeometry;
use crate::error::{Error, Result};
use crate::fov::FOV;
use crate::hole_filler::HoleFiller;
use crate::image::Detector;
use crate::mlp::MlpKind;
use crate::pairs::{PairBackProjectionConfig, PairProjectionConfig};
use crate::physics::{Material, RangeTable};
use crate::projector::ProjectorKind;
use crate::streaming::StreamingConfig;
use super::{deserialize_uom, deserialize_uom_opt, deserialize_uom_2d, deserialize_uom_3d};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {

    /// Number of chunks into which projections or pairs are split
    #[serde(default = "one")]
    pub divisions: usize,

    /// Weight projections in place rather than into copies
    #[serde(default)]
    pub in_place: bool,

    /// Worker threads; all available cores if absent
    #[serde(default)]
    pub threads: Option<usize>,

    #[serde(default)]
    pub projector: ProjectorKind,

    pub geometry: Option<GeometrySection>,
    pub detector: Option<DetectorSection>,
    pub volume: Option<VolumeSection>,

    #[serde(default)]
    pub mlp: MlpKind,

    #[serde(default)]
    pub material: MaterialSection,

    pub pairs: Option<PairsSection>,
    pub hole_filler: Option<HoleFiller>,
}

/// Regular circular trajectory
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GeometrySection {
    pub projections: usize,

    #[serde(default = "zero_angle", deserialize_with = "deserialize_uom")]
    pub first_angle: Angle,

    #[serde(deserialize_with = "deserialize_uom")]
    pub arc: Angle,

    #[serde(deserialize_with = "deserialize_uom")]
    pub sid: Length,

    /// Zero for parallel beams
    #[serde(deserialize_with = "deserialize_uom")]
    pub sdd: Length,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DetectorSection {
    #[serde(deserialize_with = "deserialize_uom_2d")]
    pub size: (Length, Length),
    pub pixels: (usize, usize),
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VolumeSection {
    #[serde(deserialize_with = "deserialize_uom_3d")]
    pub size: (Length, Length, Length),
    pub voxels: (usize, usize, usize),
}

/// Medium for conversion of energies to WEPL. Water unless stated otherwise.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MaterialSection {
    #[serde(default = "water")]
    pub name: String,

    #[serde(default = "water_z_over_a")]
    pub z_over_a: f64,

    #[serde(default = "water_density", deserialize_with = "deserialize_uom")]
    pub density: MassDensity,

    #[serde(default = "water_ionisation_potential", deserialize_with = "deserialize_uom")]
    pub ionisation_potential: Energy,

    /// Highest energy in the range table
    #[serde(default = "max_energy", deserialize_with = "deserialize_uom")]
    pub max_energy: Energy,

    /// Energy bin of the range table
    #[serde(default = "energy_bin", deserialize_with = "deserialize_uom")]
    pub energy_bin: Energy,
}

impl Default for MaterialSection {
    fn default() -> Self {
        Self {
            name: water(),
            z_over_a: water_z_over_a(),
            density: water_density(),
            ionisation_potential: water_ionisation_potential(),
            max_energy: max_energy(),
            energy_bin: energy_bin(),
        }
    }
}

/// Binning and transport of proton pairs
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PairsSection {
    /// Number of depth planes in projections
    #[serde(default = "one")]
    pub planes: usize,

    #[serde(default = "zero_length", deserialize_with = "deserialize_uom")]
    pub first_plane: Length,

    #[serde(default = "one_mm", deserialize_with = "deserialize_uom")]
    pub plane_spacing: Length,

    /// Depth of a point source; parallel beam if absent
    #[serde(default, deserialize_with = "deserialize_uom_opt")]
    pub source_position: Option<Length>,

    pub hull: Option<HullSection>,

    #[serde(default)]
    pub noise: bool,

    #[serde(default)]
    pub scattering: bool,

    /// Scattering from the 38.3% quantile of the angles in each bin
    #[serde(default)]
    pub robust: bool,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "shape", rename_all = "kebab-case", deny_unknown_fields)]
pub enum HullSection {
    Cylinder {
        #[serde(deserialize_with = "deserialize_uom")]
        radius: Length,
        #[serde(deserialize_with = "deserialize_uom")]
        half_height: Length,
    },
    Cuboid {
        #[serde(deserialize_with = "deserialize_uom_3d")]
        half_extents: (Length, Length, Length),
    },
}

impl From<HullSection> for Hull {
    fn from(section: HullSection) -> Self {
        match section {
            HullSection::Cylinder { radius, half_height } =>
                Hull::Cylinder { radius: mm_(radius), half_height: mm_(half_height) },
            HullSection::Cuboid { half_extents: (x, y, z) } =>
                Hull::Cuboid { half_extents: Vector::new(mm_(x), mm_(y), mm_(z)) },
        }
    }
}

fn one() -> usize { 1 }
fn water() -> String { "water".into() }
fn water_z_over_a() -> f64 { Material::water().z_over_a }
fn water_density() -> MassDensity { g_cm3(1.0) }
fn water_ionisation_potential() -> Energy { ev(75.0) }
fn max_energy() -> Energy { mev(600.0) }
fn energy_bin() -> Energy { mev(0.01) }
fn zero_angle() -> Angle { radian(0.0) }
fn zero_length() -> Length { mm(0.0) }
fn one_mm() -> Length { mm(1.0) }

fn missing(section: &str) -> Error {
    Error::InvalidConfig(format!("missing [{section}] section"))
}

impl Config {

    pub fn geometry(&self) -> Result<CircularGeometry> {
        let g = self.geometry.ok_or_else(|| missing("geometry"))?;
        if g.projections == 0 {
            return Err(Error::InvalidConfig("geometry needs at least one projection".into()))
        }
        CircularGeometry::regular(g.projections, g.first_angle, g.arc, g.sid, g.sdd)
    }

    /// Detector of photon projections: a single plane
    pub fn detector(&self) -> Result<Detector> {
        let d = self.detector.ok_or_else(|| missing("detector"))?;
        Detector::new(d.size, d.pixels)
    }

    /// Detector of proton projections, with the depth planes of `[pairs]`
    pub fn pair_detector(&self) -> Result<Detector> {
        let p = self.pairs.ok_or_else(|| missing("pairs"))?;
        self.detector()?.with_depth_planes(p.planes, p.first_plane, p.plane_spacing)
    }

    pub fn fov(&self) -> Result<FOV> {
        let v = self.volume.ok_or_else(|| missing("volume"))?;
        FOV::new(v.size, v.voxels)
    }

    pub fn material(&self) -> Result<Material> {
        let m = &self.material;
        Material::custom(&m.name, m.z_over_a, m.density, m.ionisation_potential)
    }

    /// Tabulating the range is costly: build it once per run.
    pub fn range_table(&self) -> Result<RangeTable> {
        RangeTable::new(&self.material()?, self.material.max_energy, self.material.energy_bin)
    }

    pub fn hull(&self) -> Option<Hull> {
        self.pairs.and_then(|p| p.hull).map(Hull::from)
    }

    pub fn pair_projection(&self, ranges: RangeTable) -> Result<PairProjectionConfig> {
        let p = self.pairs.ok_or_else(|| missing("pairs"))?;
        Ok(PairProjectionConfig {
            detector: self.pair_detector()?,
            mlp: self.mlp,
            hull: self.hull(),
            source_position: p.source_position.map(mm_),
            noise: p.noise,
            scattering: p.scattering,
            robust: p.robust,
            ranges,
        })
    }

    /// `rotation`: gantry angle at which the pairs were measured
    pub fn pair_back_projection(&self, ranges: RangeTable, rotation: Option<Angle>) -> Result<PairBackProjectionConfig> {
        Ok(PairBackProjectionConfig {
            fov: self.fov()?,
            mlp: self.mlp,
            hull: self.hull(),
            rotation: rotation.map(units::radian_),
            ranges,
        })
    }

    pub fn streaming(&self, verbose: bool) -> StreamingConfig {
        StreamingConfig { divisions: self.divisions, in_place: self.in_place, verbose }
    }
}

pub fn read_config_file(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::InvalidConfig(format!("couldn't read config file `{}`: {e}", path.display())))?;
    Ok(toml::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use units::{degree_, mev_};
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    fn parse(input: &str) -> Config { toml::from_str(input).unwrap() }

    fn hull_dimensions(hull: Option<Hull>) -> Vec<f64> {
        match hull {
            Some(Hull::Cylinder { radius, half_height }) => vec![radius, half_height],
            Some(Hull::Cuboid { half_extents: h }) => vec![h.x, h.y, h.z],
            None => vec![],
        }
    }

    // ----- Test the example on-disk config file ----------------------------------------
    #[test]
    fn example_config_file() -> Result<()> {
        let config = read_config_file(Path::new("pct-config.toml"))?;
        assert_eq!(config.divisions, 4);
        assert_eq!(config.projector, ProjectorKind::DistanceDriven);
        let geometry = config.geometry()?;
        assert_eq!(geometry.count(), 180);
        assert_float_eq!(degree_(geometry.angle(179)?), 358.0, rel <= 1e-12);
        assert_eq!(config.detector()?.n, [64, 48, 1]);
        assert_eq!(config.pair_detector()?.n, [64, 48, 5]);
        assert_eq!(config.fov()?.n, [32, 32, 24]);
        assert_eq!(config.mlp, MlpKind::Polynomial { degree: 3 });
        assert_float_eq!(hull_dimensions(config.hull()), vec![100.0, 80.0], rmax_all <= 1e-12);
        assert_eq!(config.hole_filler, Some(HoleFiller::new(0.0, 4)));
        Ok(())
    }

    #[test]
    fn defaults() {
        let config = parse("");
        assert_eq!(config.divisions, 1);
        assert!(!config.in_place);
        assert_eq!(config.threads, None);
        assert_eq!(config.projector, ProjectorKind::Zeng);
        assert_eq!(config.mlp, MlpKind::default());
        assert_eq!(config.material, MaterialSection::default());
        assert!(matches!(config.geometry(), Err(Error::InvalidConfig(_))));
        assert!(matches!(config.pair_detector(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn reject_unknown_field() {
        assert!(toml::from_str::<Config>("unknown_field = 666").is_err());
        assert!(toml::from_str::<Config>("[volume]\nsize = [\"1 mm\", \"1 mm\", \"1 mm\"]\nvoxels = [1, 1, 1]\ncolour = 2").is_err());
    }

    #[test]
    fn custom_material() -> Result<()> {
        let config = parse(r#"
            [material]
            name = "bone"
            z_over_a = 0.53
            density = "1.85 g/cm3"
            ionisation_potential = "106.4 eV"
            max_energy = "300 MeV"
            energy_bin = "0.1 MeV"
        "#);
        let m = config.material()?;
        assert_eq!(m.name, "bone");
        assert_float_eq!(m.relative_electron_density(), 0.53 * 1.85 / 0.555087, rel <= 1e-12);
        // Within one bin
        assert_float_eq!(config.range_table()?.max_energy(), 300.0, abs <= 0.11);
        assert_float_eq!(mev_(config.material.energy_bin), 0.1, rel <= 1e-12);
        Ok(())
    }

    #[test]
    fn cuboid_hull_and_source() -> Result<()> {
        let config = parse(r#"
            [detector]
            size = ["100 mm", "50 mm"]
            pixels = [10, 5]

            [pairs]
            source_position = "-2 m"
            noise = true
            robust = true
            hull = { shape = "cuboid", half_extents = ["5 cm", "6 cm", "7 cm"] }
        "#);
        assert_float_eq!(hull_dimensions(config.hull()), vec![50.0, 60.0, 70.0], rmax_all <= 1e-12);
        let projection = config.pair_projection(RangeTable::new(&Material::water(), mev(250.0), mev(1.0))?)?;
        assert_float_eq!(projection.source_position.unwrap(), -2000.0, rel <= 1e-12);
        assert!(projection.noise);
        assert!(!projection.scattering);
        assert!(projection.robust);
        assert_eq!(projection.detector.n, [10, 5, 1]);
        Ok(())
    }

    #[test]
    fn parallel_geometry() -> Result<()> {
        let config = parse(r#"
            [geometry]
            projections = 4
            arc = "180 deg"
            sid = "1000 mm"
            sdd = "0 mm"
        "#);
        let geometry = config.geometry()?;
        assert!(geometry.frame(0)?.is_parallel());
        assert_float_eq!(degree_(geometry.angle(3)?), 135.0, rel <= 1e-12);
        Ok(())
    }
}
