mod cli;
use cli::*;

fn main() -> Result<(), Box<dyn Error>> {

    let args = Cli::parse();
    let mut progress = Progress::new();

    progress.start("Reading configuration");
    let config = read_config_file(&args.config)?;
    let geometry = config.geometry()?;
    let detector = config.detector()?;
    let mut streaming = config.streaming(args.verbose);
    if let Some(divisions) = args.divisions { streaming.divisions = divisions }
    let controller = StreamingController::new(streaming)?;
    let weighting = Weighting::fdk(&geometry, &detector);
    progress.done();

    let mut source = RawFileSource::open(&args.input, detector)?;
    println!("{} projections of {} x {} pixels in {} chunks",
             group_digits(ProjectionSource::<f32>::len(&source)),
             detector.n[0], detector.n[1],
             controller.chunks(ProjectionSource::<f32>::len(&source)).len());

    let threads = args.threads.or(config.threads).unwrap_or_else(rayon::current_num_threads);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;

    if args.weight_only {
        progress.startln("Weighting projections");
        let mut sink = RawFileSink::create(&args.output)?;
        let summary = pool.install(|| controller.run_weighting::<f32, _, _, _>(&weighting, &geometry, &mut source, &mut sink))
            .map_err(report)?;
        progress.done_with_message(&format!("Wrote weighted projections to {}: {summary}", args.output.display()));
        return Ok(())
    }

    let fov = config.fov()?;
    let projector = Projector::new(config.projector);
    progress.startln(&format!("Reconstructing {:?} voxels with {:?} projector", fov.n, config.projector));
    let (mut volume, summary) = pool.install(|| controller.run_reconstruction::<f32, _, _, _>(&weighting, &projector, &geometry, &mut source, fov))
        .map_err(report)?;
    progress.done_with_message(&format!("Reconstructed: {summary}"));

    if let Some(filler) = config.hole_filler {
        progress.start("Filling small holes");
        let report = filler.fill_volume_in_place(&mut volume);
        progress.done_with_message(&format!("{} voxels filled, {} left", group_digits(report.filled), group_digits(report.left)));
    }

    progress.start(&format!("Writing volume to {}", args.output.display()));
    publish_volume(&volume, &args.output)?;
    progress.done();
    Ok(())
}

/// Print how far a failed run got, and pass on the failure
fn report(failure: RunFailure) -> RunFailure {
    eprintln!("Run failed after {}", failure.summary);
    failure
}

// ----- Imports -----------------------------------------------------------------------------------------
use std::error::Error;

use clap::Parser;

use protalo::{
    config::read_config_file,
    projector::Projector,
    streaming::{ProjectionSource, RawFileSink, RawFileSource, RunFailure, StreamingController, publish_volume},
    utils::{group_digits, timing::Progress},
    weighting::Weighting,
};
