//! Whole pipelines over projection series, run through the streaming
//! controller.

use rstest::rstest;
use float_eq::assert_float_eq;
#[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

use ndarray::Array4;
use ndarray_rand::RandomExt;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use rand_isaac::Isaac64Rng;

use protalo::circular::CircularGeometry;
use protalo::fov::FOV;
use protalo::image::{Detector, ProjectionStack, Volume};
use protalo::projector::{Projector, ProjectorKind};
use protalo::streaming::{MemorySink, MemorySource, ProjectionSource, RawFileSink, RawFileSource,
                         StreamingConfig, StreamingController, publish_volume};
use protalo::weighting::{Weigh, Weighting};
use protalo::io;
use units::{degree, mm};

const N: usize = 12;

fn setup(arc: f64) -> (CircularGeometry, Detector, FOV, ProjectionStack<f32>) {
    let geometry = CircularGeometry::regular(N, degree(0.0), degree(arc), mm(400.0), mm(600.0)).unwrap();
    let detector = Detector::new((mm(96.0), mm(64.0)), (24, 16)).unwrap();
    let fov = FOV::new((mm(40.0), mm(40.0), mm(30.0)), (8, 8, 6)).unwrap();
    let mut rng = Isaac64Rng::seed_from_u64(2024);
    let data = Array4::random_using(detector.shape(N), Uniform::new(0.0_f32, 1.0), &mut rng);
    (geometry, detector, fov, ProjectionStack { detector, first: 0, data })
}

fn controller(divisions: usize) -> StreamingController {
    StreamingController::new(StreamingConfig { divisions, in_place: true, verbose: false }).unwrap()
}

fn reconstruct(kind: ProjectorKind, arc: f64, divisions: usize) -> Volume<f32> {
    let (geometry, detector, fov, stack) = setup(arc);
    let weighting = Weighting::fdk(&geometry, &detector);
    let (volume, summary) = controller(divisions)
        .run_reconstruction(&weighting, &Projector::new(kind), &geometry, &mut MemorySource::new(stack), fov)
        .unwrap();
    assert_eq!(summary.processed, N);
    assert_eq!(summary.rejected, 0);
    volume
}

// Every voxel accumulates the projections in series order, whatever the
// chunking, so the results are identical
#[rstest(/**/ kind, arc,
         case(ProjectorKind::Zeng, 360.0),
         case(ProjectorKind::DistanceDriven, 360.0),
         case(ProjectorKind::Zeng, 220.0), // short scan: Parker weights
)]
fn reconstruction_independent_of_chunking(kind: ProjectorKind, arc: f64) {
    let whole = reconstruct(kind, arc, 1);
    assert!(whole.values().any(|v| v != 0.0));
    for divisions in [2, 3, 4, 6, 12] {
        assert_eq!(reconstruct(kind, arc, divisions), whole, "{divisions} divisions");
    }
}

#[rstest(/**/ divisions, case(1), case(5), case(12))]
fn weighting_independent_of_chunking(divisions: usize) {
    let (geometry, detector, _, stack) = setup(200.0);
    let weighting = Weighting::fdk(&geometry, &detector);
    let expected = weighting.apply(&stack).unwrap();
    let mut sink = MemorySink::new();
    controller(divisions)
        .run_weighting(&weighting, &geometry, &mut MemorySource::new(stack), &mut sink)
        .unwrap();
    assert_eq!(sink.chunks().len(), divisions);
    assert_eq!(sink.stack().unwrap(), expected);
}

#[test]
fn file_to_file() -> protalo::Result<()> {
    let (geometry, detector, fov, stack) = setup(360.0);
    let dir = tempfile::tempdir()?;
    let input    = dir.path().join("projections.raw");
    let weighted = dir.path().join("weighted.raw");
    let output   = dir.path().join("volume.raw");
    io::raw::write(stack.values(), &input)?;

    let weighting = Weighting::fdk(&geometry, &detector);
    let mut source = RawFileSource::open(&input, detector)?;
    assert_eq!(ProjectionSource::<f32>::len(&source), N);
    let mut sink = RawFileSink::create(&weighted)?;
    controller(4).run_weighting::<f32, _, _, _>(&weighting, &geometry, &mut source, &mut sink)
        .map_err(|f| f.error)?;
    let reloaded: Vec<f32> = io::raw::read(&weighted)?.collect::<Result<_, _>>()?;
    let expected: Vec<f32> = weighting.apply(&stack)?.values().collect();
    assert_eq!(reloaded, expected);

    let (volume, _) = controller(3)
        .run_reconstruction::<f32, _, _, _>(&weighting, &Projector::new(ProjectorKind::Zeng), &geometry, &mut source, fov)
        .map_err(|f| f.error)?;
    publish_volume(&volume, &output)?;
    assert_eq!(io::raw::len(&output)?, fov.len());
    let expected = reconstruct(ProjectorKind::Zeng, 360.0, 1);
    let reloaded: Vec<f32> = io::raw::read(&output)?.collect::<Result<_, _>>()?;
    assert_eq!(reloaded, expected.values().collect::<Vec<_>>());
    Ok(())
}

// Back-projecting a uniform, unfiltered parallel-beam full scan gives a
// uniform disc: every voxel sees the same total weight
#[test]
fn uniform_parallel_projections_back_project_uniformly() {
    let geometry = CircularGeometry::regular(8, degree(0.0), degree(360.0), mm(1000.0), mm(0.0)).unwrap();
    let detector = Detector::new((mm(200.0), mm(200.0)), (40, 40)).unwrap();
    let fov = FOV::new((mm(20.0), mm(20.0), mm(20.0)), (4, 4, 4)).unwrap();
    let stack = ProjectionStack::<f64> { detector, first: 0, data: Array4::from_elem(detector.shape(8), 0.5) };
    let (volume, _) = controller(2)
        .run_reconstruction(&Weighting::new(vec![]), &Projector::new(ProjectorKind::Zeng), &geometry, &mut MemorySource::new(stack), fov)
        .unwrap();
    for v in volume.values() { assert_float_eq!(v, 4.0, rel <= 1e-12) }
}
