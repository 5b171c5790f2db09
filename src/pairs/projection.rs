use geometry::Hull;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::image::{Detector, ProjectionStack};
use crate::mlp::{Mlp, MlpKind};
use crate::physics::RangeTable;
use crate::types::Sample;
use super::{ProtonPair, Reject, Tally, Track, job_size, prepare};

/// Everything needed to bin proton pairs into a depth-resolved projection.
#[derive(Clone, Debug)]
pub struct PairProjectionConfig {
    /// Pixel grid: `u`, `v` transverse, planes sampling depth along the beam
    pub detector: Detector,
    pub mlp: MlpKind,
    pub hull: Option<Hull>,
    /// Depth (mm) of a point source, for cone-beam magnification of the
    /// planes onto the exit plane. `None` for a parallel beam.
    pub source_position: Option<f64>,
    /// Also produce the variance of the mean WEPL in each bin
    pub noise: bool,
    /// Also produce the angular variance of the protons in each bin
    pub scattering: bool,
    /// Estimate the angular spread from the 38.3% quantile of the angles in
    /// each bin (half a standard deviation for a Gaussian) rather than from
    /// their second moment, which large-angle outliers dominate. Needs
    /// `scattering`.
    pub robust: bool,
    /// Conversion of measured energies to WEPL
    pub ranges: RangeTable,
}

/// Accumulates the WEPL of proton pairs in the detector bins crossed by their
/// paths, one bin per depth plane.
#[derive(Clone, Debug)]
pub struct PairProjector {
    config: PairProjectionConfig,
    mlp: Mlp,
}

/// Running sums over all pairs seen so far. Merged across threads and chunks.
#[derive(Clone, Debug, PartialEq)]
pub struct Bins {
    wepl: Vec<f64>,
    wepl_squared: Vec<f64>,
    counts: Vec<f64>,
    angles_squared: Vec<f64>,
    /// Every angle seen in each bin: only kept for robust estimates
    angles: Vec<Vec<f64>>,
    pub tally: Tally,
}

impl Bins {

    fn zeros(detector: &Detector, robust: bool) -> Self {
        let n = detector.pixels();
        Self {
            wepl:           vec![0.0; n],
            wepl_squared:   vec![0.0; n],
            counts:         vec![0.0; n],
            angles_squared: vec![0.0; n],
            angles: if robust { vec![Vec::new(); n] } else { Vec::new() },
            tally: Tally::default(),
        }
    }

    fn merge(mut self, other: Bins) -> Bins {
        let add = |a: &mut Vec<f64>, b: Vec<f64>| a.iter_mut().zip(b).for_each(|(l, r)| *l += r);
        add(&mut self.wepl,           other.wepl);
        add(&mut self.wepl_squared,   other.wepl_squared);
        add(&mut self.counts,         other.counts);
        add(&mut self.angles_squared, other.angles_squared);
        self.angles.iter_mut().zip(other.angles).for_each(|(l, r)| l.extend(r));
        self.tally = self.tally.merge(other.tally);
        self
    }
}

/// Result of binning: one projection per requested image
#[derive(Clone, Debug, PartialEq)]
pub struct PairProjection<T> {
    /// Mean WEPL of the pairs crossing each bin
    pub wepl: ProjectionStack<T>,
    /// Number of pairs crossing each bin
    pub counts: ProjectionStack<T>,
    /// Variance of the mean WEPL
    pub noise: Option<ProjectionStack<T>>,
    /// Variance of the scattering angle, per transverse axis
    pub scattering: Option<ProjectionStack<T>>,
    pub tally: Tally,
}

impl PairProjector {

    /// Fails with `UnsupportedDegree` if the path estimator cannot be built,
    /// or `InvalidConfig` if the source lies among the depth planes.
    pub fn new(config: PairProjectionConfig) -> Result<Self> {
        let mlp = Mlp::new(config.mlp)?;
        if let Some(source) = config.source_position {
            let d = &config.detector;
            let planes = d.depth(0).min(d.depth(d.n[2] - 1))..=d.depth(0).max(d.depth(d.n[2] - 1));
            if !source.is_finite() || planes.contains(&source) {
                return Err(Error::InvalidConfig(format!(
                    "source at depth {source} mm must lie outside the depth planes {planes:?}")))
            }
        }
        Ok(Self { config, mlp })
    }

    pub fn detector(&self) -> &Detector { &self.config.detector }

    /// Empty bins, ready to `accumulate` pairs
    pub fn bins(&self) -> Bins { Bins::zeros(&self.config.detector, self.robust()) }

    fn robust(&self) -> bool { self.config.scattering && self.config.robust }

    /// Add `pairs` to `bins`. Degenerate pairs are tallied and skipped.
    pub fn accumulate(&self, bins: &mut Bins, pairs: &[ProtonPair]) {
        let initial_thread_state = || (self.bins(), self.mlp.clone());
        let chunk = pairs
            .par_iter()
            .with_min_len(job_size(pairs.len()))
            .fold(initial_thread_state, |(mut bins, mut mlp), pair| {
                let outcome = self.bin_one_pair(&mut bins, &mut mlp, pair);
                bins.tally.record(&outcome);
                (bins, mlp)
            })
            .map(|(bins, _)| bins)
            .reduce(|| self.bins(), Bins::merge);
        *bins = std::mem::replace(bins, self.bins()).merge(chunk);
    }

    fn bin_one_pair(&self, bins: &mut Bins, mlp: &mut Mlp, pair: &ProtonPair) -> std::result::Result<(), Reject> {
        let config = &self.config;
        let detector = &config.detector;
        let (track, wepl) = prepare(pair, config.hull.as_ref(), &config.ranges, mlp)?;
        let [nu, nv, nk] = detector.n;

        // Positions at every depth plane, before touching the bins
        let positions: Vec<_> = (0..nk)
            .map(|k| {
                let z = detector.depth(k);
                let p = track.position(&*mlp, z);
                let m = self.magnification(pair.exit.z, z);
                (p.x * m, p.y * m)
            })
            .collect();
        if positions.iter().any(|(x, y)| !(x.is_finite() && y.is_finite())) {
            return Err(Reject::Divergence)
        }

        let (ax, ay) = if config.scattering { pair.scattering_angles() } else { (0.0, 0.0) };
        let angles_squared = ax * ax + ay * ay;
        let robust = self.robust();

        for (k, (x, y)) in positions.into_iter().enumerate() {
            let i = detector.continuous_index(0, x).round();
            let j = detector.continuous_index(1, y).round();
            if i < 0.0 || j < 0.0 || i >= nu as f64 || j >= nv as f64 { continue }
            let index = i as usize + nu * (j as usize + nv * k);
            bins.wepl[index] += wepl;
            bins.counts[index] += 1.0;
            if config.noise      { bins.wepl_squared  [index] += wepl * wepl }
            if config.scattering { bins.angles_squared[index] += angles_squared }
            if robust            { bins.angles[index].extend([ax, ay]) }
        }
        Ok(())
    }

    /// Scaling of transverse positions at depth `z` onto the exit plane at
    /// depth `exit`, for a point source.
    fn magnification(&self, exit: f64, z: f64) -> f64 {
        match self.config.source_position {
            None         => 1.0,
            Some(source) => (exit - source) / (z - source),
        }
    }

    /// Turn the sums into mean WEPL and the requested auxiliary images.
    pub fn finish<T: Sample>(&self, bins: Bins) -> Result<PairProjection<T>> {
        let detector = self.config.detector;
        let image = |values: Vec<f64>| {
            ProjectionStack::from_vec(detector, 0, values.into_iter().map(T::of).collect())
        };
        let Bins { wepl, wepl_squared, counts, angles_squared, mut angles, tally } = bins;
        let mean: Vec<f64> = wepl.iter().zip(&counts)
            .map(|(&w, &n)| if n > 0.0 { w / n } else { 0.0 })
            .collect();
        let noise = self.config.noise.then(|| {
            wepl_squared.iter().zip(&mean).zip(&counts)
                .map(|((&sq, &m), &n)| if n > 0.0 { (sq / n - m * m) / n } else { 0.0 })
                .collect::<Vec<_>>()
        });
        // Each pair contributes two angles
        let scattering = self.config.scattering.then(|| if self.robust() {
            angles.iter_mut().map(|a| robust_variance(a)).collect::<Vec<_>>()
        } else {
            angles_squared.iter().zip(&counts)
                .map(|(&sq, &n)| if n > 0.0 { sq / n / 2.0 } else { 0.0 })
                .collect::<Vec<_>>()
        });
        Ok(PairProjection {
            wepl:       image(mean)?,
            counts:     image(counts)?,
            noise:      noise     .map(image).transpose()?,
            scattering: scattering.map(image).transpose()?,
            tally,
        })
    }

    /// Bin all `pairs` in one go.
    pub fn project<T: Sample>(&self, pairs: &[ProtonPair]) -> Result<PairProjection<T>> {
        let mut bins = self.bins();
        self.accumulate(&mut bins, pairs);
        self.finish(bins)
    }
}

/// Variance of the scattering angle estimated from the 38.3% quantile of the
/// (non-negative) `angles`, interpolated between neighbouring order
/// statistics. Zero for bins crossed by fewer than two pairs.
fn robust_variance(angles: &mut [f64]) -> f64 {
    if angles.len() < 4 { return 0.0 }
    let position = angles.len() as f64 * 0.383;
    let above = position.ceil() as usize;
    let fraction = above as f64 - position;
    angles.sort_unstable_by(f64::total_cmp);
    // The quantile is half a standard deviation
    let sigma = 2.0 * (angles[above] * (1.0 - fraction) + angles[above - 1] * fraction);
    sigma * sigma
}
