use geometry::{Hull, rotate_about_y};
use rayon::prelude::*;

use crate::error::Result;
use crate::fov::FOV;
use crate::image::Volume;
use crate::mlp::{Mlp, MlpKind};
use crate::physics::RangeTable;
use crate::projector::siddon::{SystemMatrixRow, update_row};
use crate::projector::elementwise_add;
use crate::types::{Point, Sample};
use super::{ProtonPair, Reject, Tally, job_size, prepare};

/// Everything needed to spread proton pairs over a volume.
#[derive(Clone, Debug)]
pub struct PairBackProjectionConfig {
    pub fov: FOV,
    pub mlp: MlpKind,
    pub hull: Option<Hull>,
    /// Gantry angle (radians) at which the pairs were measured. The paths are
    /// rotated by it into the object frame. `None` leaves them unrotated.
    pub rotation: Option<f64>,
    /// Conversion of measured energies to WEPL
    pub ranges: RangeTable,
}

/// Apportions the WEPL of each proton pair among the voxels traversed by its
/// path, in proportion to the length of path in each voxel.
#[derive(Clone, Debug)]
pub struct PairBackProjector {
    config: PairBackProjectionConfig,
    mlp: Mlp,
}

/// Running sums over all pairs seen so far. Merged across threads and chunks.
#[derive(Clone, Debug, PartialEq)]
pub struct Sums {
    /// Apportioned WEPL
    wepl: Vec<f64>,
    /// Apportioned fraction of each path
    weights: Vec<f64>,
    pub tally: Tally,
}

impl Sums {

    fn zeros(fov: &FOV) -> Self {
        Self { wepl: vec![0.0; fov.len()], weights: vec![0.0; fov.len()], tally: Tally::default() }
    }

    fn merge(self, other: Sums) -> Sums {
        Sums {
            wepl:    elementwise_add(self.wepl,    other.wepl),
            weights: elementwise_add(self.weights, other.weights),
            tally:   self.tally.merge(other.tally),
        }
    }
}

/// Sum of apportioned WEPL, and the normalisation volume of apportioned path
/// fractions.
#[derive(Clone, Debug, PartialEq)]
pub struct PairBackProjection<T> {
    pub wepl: Volume<T>,
    pub weights: Volume<T>,
    pub tally: Tally,
}

impl<T: Sample> PairBackProjection<T> {
    /// Apportioned WEPL divided by the normalisation volume; zero where no
    /// path passed.
    pub fn normalised(&self) -> Volume<T> {
        let mut out = self.wepl.clone();
        out.data.zip_mut_with(&self.weights.data, |w, &n| {
            *w = if n > T::zero() { *w / n } else { T::zero() }
        });
        out
    }
}

// Data needed by `back_project_one_pair`, both as input and output, because
// of the constraints imposed by `fold`
struct FoldState {
    sums: Sums,
    mlp: Mlp,
    system_matrix_row: SystemMatrixRow,
    contributions: Vec<(usize, f64)>,
}

impl PairBackProjector {

    /// Fails with `UnsupportedDegree` if the path estimator cannot be built.
    pub fn new(config: PairBackProjectionConfig) -> Result<Self> {
        let mlp = Mlp::new(config.mlp)?;
        Ok(Self { config, mlp })
    }

    pub fn fov(&self) -> &FOV { &self.config.fov }

    /// Empty sums, ready to `accumulate` pairs
    pub fn sums(&self) -> Sums { Sums::zeros(&self.config.fov) }

    /// Add `pairs` to `sums`. Degenerate pairs are tallied and skipped.
    pub fn accumulate(&self, sums: &mut Sums, pairs: &[ProtonPair]) {
        let fov = &self.config.fov;
        // Closure preparing the state needed by `fold`: will be called by
        // `fold` at the start of every job.
        let initial_thread_state = || FoldState {
            sums: Sums::zeros(fov),
            mlp: self.mlp.clone(),
            system_matrix_row: SystemMatrixRow::buffer(fov),
            contributions: Vec::new(),
        };
        let chunk = pairs
            .par_iter()
            // Each job needs two whole volumes as accumulators: keep them few
            .with_min_len(job_size(pairs.len()))
            .fold(initial_thread_state, |mut state, pair| {
                let outcome = self.back_project_one_pair(&mut state, pair);
                state.sums.tally.record(&outcome);
                state
            })
            .map(|state| state.sums)
            .reduce(|| Sums::zeros(fov), Sums::merge);
        *sums = std::mem::replace(sums, Sums::zeros(fov)).merge(chunk);
    }

    fn back_project_one_pair(&self, state: &mut FoldState, pair: &ProtonPair) -> std::result::Result<(), Reject> {
        let config = &self.config;
        let fov = &config.fov;
        let FoldState { sums, mlp, system_matrix_row, contributions } = state;
        let (track, wepl) = prepare(pair, config.hull.as_ref(), &config.ranges, mlp)?;

        // Sample the path wherever it may bend: at the hull and at every
        // plane of the voxel grid between the trackers. Planes are only
        // needed where the path can be inside the FOV; beyond that the path
        // is followed by single straight segments.
        let step = fov.voxel_size.iter().copied().fold(f64::INFINITY, f64::min);
        let plane0 = fov.lower_corner().z;
        let (z_in, z_out) = (pair.entry.z, pair.exit.z);
        let (lo, hi) = self.depth_extent();
        let (lo, hi) = (z_in.max(lo), z_out.min(hi));
        let mut depths = vec![z_in, track.entry.depth, track.exit.depth, z_out];
        if lo < hi {
            depths.extend([lo, hi]);
            let mut m = ((lo - plane0) / step).floor() as i64 + 1;
            loop {
                let z = plane0 + m as f64 * step;
                if !(z < hi) { break }
                depths.push(z);
                m += 1;
            }
        }
        depths.retain(|&z| z >= z_in && z <= z_out);
        depths.sort_by(f64::total_cmp);
        depths.dedup();

        let rotation = config.rotation.unwrap_or(0.0);
        let points: Vec<Point> = depths.iter()
            .map(|&z| rotate_about_y(track.position(&*mlp, z), rotation))
            .collect();
        if points.iter().any(|p| !p.iter().all(|c| c.is_finite())) {
            return Err(Reject::Divergence)
        }

        // Lengths of path in each voxel, segment by segment
        contributions.clear();
        let [nx, ny, _] = fov.n;
        for segment in points.windows(2) {
            update_row(system_matrix_row, fov, segment[0], segment[1]);
            contributions.extend(system_matrix_row.iter()
                .map(|&([ix, iy, iz], length)| (ix + nx * (iy + ny * iz), length)));
        }
        let total: f64 = contributions.iter().map(|(_, l)| l).sum();
        if !(total > 0.0) { return Ok(()) }

        for &(index, length) in contributions.iter() {
            let fraction = length / total;
            sums.wepl   [index] += wepl * fraction;
            sums.weights[index] += fraction;
        }
        Ok(())
    }

    /// Range of depths, in the frame of the pairs, outside which no point
    /// lies in the FOV. Under rotation the FOV's bounding sphere is used.
    fn depth_extent(&self) -> (f64, f64) {
        let fov = &self.config.fov;
        let (lower, upper) = (fov.lower_corner(), fov.upper_corner());
        match self.config.rotation {
            None => (lower.z, upper.z),
            Some(angle) => {
                let centre = nalgebra::center(&lower, &upper);
                let radius = (upper - lower).norm() / 2.0;
                let z = rotate_about_y(centre, -angle).z;
                (z - radius, z + radius)
            }
        }
    }

    pub fn finish<T: Sample>(&self, sums: Sums) -> Result<PairBackProjection<T>> {
        let fov = self.config.fov;
        let volume = |values: Vec<f64>| Volume::from_vec(fov, values.into_iter().map(T::of).collect());
        Ok(PairBackProjection {
            wepl:    volume(sums.wepl)?,
            weights: volume(sums.weights)?,
            tally:   sums.tally,
        })
    }

    /// Back-project all `pairs` in one go.
    pub fn back_project<T: Sample>(&self, pairs: &[ProtonPair]) -> Result<PairBackProjection<T>> {
        let mut sums = self.sums();
        self.accumulate(&mut sums, pairs);
        self.finish(sums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::test_pairs::*;
    use super::super::Measurement;
    use float_eq::assert_float_eq;
    use units::{mm, mev};
    use crate::error::PairDefect;
    use crate::physics::Material;
    use crate::types::Vector;
    use rstest::rstest;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    fn config(mlp: MlpKind) -> PairBackProjectionConfig {
        PairBackProjectionConfig {
            fov: FOV::new((mm(50.0), mm(50.0), mm(50.0)), (5, 5, 5)).unwrap(),
            mlp,
            hull: Some(Hull::Cylinder { radius: 30.0, half_height: 40.0 }),
            rotation: None,
            ranges: RangeTable::new(&Material::water(), mev(250.0), mev(0.1)).unwrap(),
        }
    }

    #[test]
    fn wepl_is_conserved() {
        let projector = PairBackProjector::new(config(MlpKind::default())).unwrap();
        let out: PairBackProjection<f64> = projector.back_project(&[along_beam(-12.0, 3.0, 14.0, -6.0, 187.0)]).unwrap();
        assert_float_eq!(out.wepl.sum(), 187.0, rel <= 1e-12);
        assert_float_eq!(out.weights.sum(), 1.0, rel <= 1e-12);
    }

    #[test]
    fn hundred_pairs_one_rejected() {
        let projector = PairBackProjector::new(config(MlpKind::Polynomial { degree: 2 })).unwrap();
        let pairs = hundred_with_one_broken();
        let out: PairBackProjection<f64> = projector.back_project(&pairs).unwrap();
        assert_eq!(out.tally.processed, 99);
        assert_eq!(out.tally.rejected_total(), 1);
        assert_eq!(out.tally.rejected[&Reject::Invalid(PairDefect::ZeroDirection)], 1);
        // 99 whole contributions
        assert_float_eq!(out.weights.sum(), 99.0, rel <= 1e-12);
        let expected: f64 = (0..100).filter(|&i| i != 37).map(|i| 150.0 + i as f64).sum();
        assert_float_eq!(out.wepl.sum(), expected, rel <= 1e-12);
    }

    #[test]
    fn rotated_pairs_cross_the_object_sideways() {
        let mut c = config(MlpKind::ThirdOrderPolynomial);
        c.rotation = Some(std::f64::consts::FRAC_PI_2);
        let projector = PairBackProjector::new(c).unwrap();
        let out: PairBackProjection<f64> = projector.back_project(&[along_beam(0.0, 0.0, 0.0, 0.0, 50.0)]).unwrap();
        let hit: Vec<_> = out.weights.data.indexed_iter()
            .filter(|(_, &w)| w > 0.0)
            .map(|((iz, iy, ix), _)| [ix, iy, iz])
            .collect();
        assert_eq!(hit, (0..5).map(|ix| [ix, 2, 2]).collect::<Vec<_>>());
        let mean = out.normalised();
        assert_float_eq!(mean.get([0, 2, 2]).unwrap(), 50.0, rel <= 1e-12);
    }

    #[test]
    fn chunks_accumulate_like_a_single_batch() {
        let projector = PairBackProjector::new(config(MlpKind::default())).unwrap();
        let pairs = hundred_with_one_broken();
        let mut sums = projector.sums();
        for chunk in pairs.chunks(33) { projector.accumulate(&mut sums, chunk) }
        let chunked: PairBackProjection<f64> = projector.finish(sums).unwrap();
        let whole: PairBackProjection<f64> = projector.back_project(&pairs).unwrap();
        assert_eq!(chunked.tally, whole.tally);
        for (a, b) in chunked.wepl.values().zip(whole.wepl.values()) {
            assert_float_eq!(a, b, rel <= 1e-12, abs <= 1e-12);
        }
    }

    fn straight(x: f64, y: f64, tracker: f64, wepl: f64) -> ProtonPair {
        ProtonPair {
            entry: Point::new(x, y, -tracker),
            exit:  Point::new(x, y,  tracker),
            entry_direction: Vector::z(),
            exit_direction:  Vector::z(),
            measurement: Measurement::Wepl(wepl),
        }
    }

    #[rstest(/**/ rotation,
             case(None),
             case(Some(0.0)),
             case(Some(0.7)),
    )]
    fn distant_trackers_deposit_like_near_ones(rotation: Option<f64>) {
        let mut c = config(MlpKind::default());
        c.rotation = rotation;
        let projector = PairBackProjector::new(c).unwrap();
        let near: PairBackProjection<f64> = projector.back_project(&[straight(3.0, -2.0, 110.0, 10.0)]).unwrap();
        let far : PairBackProjection<f64> = projector.back_project(&[straight(3.0, -2.0, 1e12, 10.0)]).unwrap();
        assert_eq!(far.tally.processed, 1);
        assert_float_eq!(far.wepl.sum(), 10.0, rel <= 1e-12);
        for (a, b) in far.wepl.values().zip(near.wepl.values()) {
            assert_float_eq!(a, b, abs <= 1e-9);
        }
    }

    #[test]
    fn energy_out_of_table_rejected() {
        let projector = PairBackProjector::new(config(MlpKind::default())).unwrap();
        let mut pair = along_beam(0.0, 0.0, 0.0, 0.0, 0.0);
        pair.measurement = Measurement::Energies { entry: 400.0, exit: 200.0 };
        let out: PairBackProjection<f32> = projector.back_project(&[pair]).unwrap();
        assert_eq!(out.tally.processed, 0);
        assert_eq!(out.tally.rejected[&Reject::Energy], 1);
        assert_eq!(out.wepl.sum(), 0.0);
    }
}
