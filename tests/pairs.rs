//! Proton-pair pipelines: simulated and hand-made pairs, streamed from files.

use float_eq::assert_float_eq;
#[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

use geometry::Hull;
use protalo::error::PairDefect;
use protalo::fov::FOV;
use protalo::image::Detector;
use protalo::io;
use protalo::mlp::MlpKind;
use protalo::pairs::{Measurement, PairBackProjection, PairBackProjectionConfig, PairBackProjector,
                     PairProjection, PairProjectionConfig, PairProjector, ProtonPair, Reject};
use protalo::physics::{Material, RangeTable};
use protalo::simulate::{Beam, Simulation};
use protalo::streaming::{MemoryPairs, StreamingConfig, StreamingController, pair_file};
use protalo::{Point, Vector};
use units::{mev, mm, radian};

fn ranges() -> RangeTable { RangeTable::new(&Material::water(), mev(250.0), mev(0.05)).unwrap() }

fn controller(divisions: usize) -> StreamingController {
    StreamingController::new(StreamingConfig { divisions, in_place: false, verbose: false }).unwrap()
}

fn simulated(n: usize, seed: u64) -> Vec<ProtonPair> {
    let beam = Beam { energy: mev(200.0), spot_size: mm(30.0), divergence: radian(0.003), tracker_distance: mm(120.0) };
    Simulation::new(beam, mm(50.0)).unwrap().pairs(&ranges(), n, seed).unwrap()
}

/// 100 pairs, of which the 38th has a zero-length entry direction
fn hundred_with_one_broken() -> Vec<ProtonPair> {
    (0..100).map(|i| {
        let x = (i % 10) as f64 * 4.0 - 18.0;
        let y = (i / 10) as f64 * 4.0 - 18.0;
        let direction = if i == 37 { Vector::zeros() } else { Vector::z() };
        ProtonPair {
            entry: Point::new(x, y, -110.0),
            exit:  Point::new(0.9 * x, 0.9 * y, 110.0),
            entry_direction: direction,
            exit_direction: Vector::z(),
            measurement: Measurement::Wepl(150.0 + i as f64),
        }
    }).collect()
}

#[test]
fn one_broken_pair_in_a_hundred_is_skipped() -> protalo::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pairs.bin");
    io::pairs::write(&hundred_with_one_broken(), &path)?;

    let projector = PairBackProjector::new(PairBackProjectionConfig {
        fov: FOV::new((mm(60.0), mm(60.0), mm(60.0)), (6, 6, 6))?,
        mlp: MlpKind::Polynomial { degree: 2 },
        hull: Some(Hull::Cylinder { radius: 30.0, half_height: 40.0 }),
        rotation: None,
        ranges: ranges(),
    })?;
    let (sums, summary) = controller(7).run_pairs(&projector, &mut pair_file(&path)?)
        .map_err(|f| f.error)?;
    assert_eq!(summary.processed, 99);
    assert_eq!(summary.rejected, 1);
    assert_eq!(sums.tally.rejected[&Reject::Invalid(PairDefect::ZeroDirection)], 1);

    let out: PairBackProjection<f64> = projector.finish(sums)?;
    assert_float_eq!(out.weights.sum(), 99.0, rel <= 1e-9);
    let expected: f64 = (0..100).filter(|&i| i != 37).map(|i| 150.0 + i as f64).sum();
    assert_float_eq!(out.wepl.sum(), expected, rel <= 1e-9);
    Ok(())
}

#[test]
fn simulated_wepl_is_conserved_by_back_projection() -> protalo::Result<()> {
    let pairs = simulated(400, 11);
    let ranges = ranges();
    let total: f64 = pairs.iter().map(|p| p.wepl(&ranges)).sum::<protalo::Result<f64>>()?;
    let projector = PairBackProjector::new(PairBackProjectionConfig {
        // Large enough to contain every path
        fov: FOV::new((mm(400.0), mm(400.0), mm(300.0)), (20, 20, 15))?,
        mlp: MlpKind::default(),
        hull: Some(Hull::Cylinder { radius: 50.0, half_height: 200.0 }),
        rotation: Some(0.3),
        ranges,
    })?;
    let (sums, summary) = controller(3).run_pairs(&projector, &mut MemoryPairs::new(pairs))
        .map_err(|f| f.error)?;
    assert_eq!(summary.rejected, 0);
    let out: PairBackProjection<f64> = projector.finish(sums)?;
    assert_float_eq!(out.wepl.sum(), total, rel <= 1e-9);
    Ok(())
}

#[test]
fn projections_of_a_cylinder_are_thickest_in_the_middle() -> protalo::Result<()> {
    let pairs = simulated(20_000, 5);
    let detector = Detector::new((mm(120.0), mm(120.0)), (12, 12))?;
    let projector = PairProjector::new(PairProjectionConfig {
        detector,
        mlp: MlpKind::ThirdOrderPolynomial,
        hull: None,
        source_position: None,
        noise: true,
        scattering: true,
        robust: false,
        ranges: ranges(),
    })?;
    let (bins, _) = controller(4).run_pairs(&projector, &mut MemoryPairs::new(pairs))
        .map_err(|f| f.error)?;
    let out: PairProjection<f64> = projector.finish(bins)?;
    // Cylinder axis along y: the mean WEPL varies with u only. Columns 5 and
    // 6 straddle the axis; column 0 lies just outside the cylinder.
    let row = 6;
    let middle = out.wepl.data[[0, 0, row, 5]];
    let side   = out.wepl.data[[0, 0, row, 2]];
    let edge   = out.wepl.data[[0, 0, row, 0]];
    assert!(middle > 90.0 && middle < 101.0, "middle {middle}");
    assert!(side > 40.0 && side < middle, "side {side}");
    assert!(out.counts.data[[0, 0, row, 0]] > 0.0);
    assert!(edge < 5.0, "edge {edge}");
    assert!(out.noise.unwrap().data[[0, 0, row, 5]] >= 0.0);
    assert!(out.scattering.unwrap().data[[0, 0, row, 5]] > 0.0);
    Ok(())
}

#[test]
fn pair_projection_independent_of_chunking() -> protalo::Result<()> {
    let pairs = simulated(2_000, 9);
    let detector = Detector::new((mm(120.0), mm(120.0)), (12, 12))?
        .with_depth_planes(3, mm(-50.0), mm(50.0))?;
    let projector = PairProjector::new(PairProjectionConfig {
        detector,
        mlp: MlpKind::Polynomial { degree: 4 },
        hull: Some(Hull::Cylinder { radius: 50.0, half_height: 200.0 }),
        source_position: Some(-2000.0),
        noise: false,
        scattering: false,
        robust: false,
        ranges: ranges(),
    })?;
    let run = |divisions| -> PairProjection<f64> {
        let (bins, _) = controller(divisions).run_pairs(&projector, &mut MemoryPairs::new(pairs.clone())).unwrap();
        projector.finish(bins).unwrap()
    };
    let whole = run(1);
    for divisions in [2, 5, 8] {
        let chunked = run(divisions);
        assert_eq!(chunked.tally, whole.tally);
        assert_eq!(chunked.counts, whole.counts);
        for (a, b) in chunked.wepl.values().zip(whole.wepl.values()) {
            assert_float_eq!(a, b, rel <= 1e-12, abs <= 1e-12);
        }
    }
    Ok(())
}
