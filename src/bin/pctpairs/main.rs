mod cli;
use cli::*;

fn main() -> Result<(), Box<dyn Error>> {

    let Cli { threads, verbose, command } = Cli::parse();
    let mut progress = Progress::new();

    match command {

        Command::Simulate { output, n, seed, energy, spot_size, divergence, tracker_distance, radius, no_scattering } => {
            let beam = Beam { energy, spot_size, divergence, tracker_distance };
            let simulation = Simulation::new(beam, radius)?.with_scattering(!no_scattering);
            progress.start("Tabulating water ranges");
            let ranges = RangeTable::water()?;
            progress.done();
            progress.start(&format!("Simulating {} protons", group_digits(n)));
            let pairs = simulation.pairs(&ranges, n, seed)?;
            progress.done_with_message(&format!("{} pairs left the cylinder", group_digits(pairs.len())));
            io::pairs::write(&pairs, &output)?;
            println!("Wrote {}", output.display());
        }

        Command::Project { config, input, output } => {
            let config = read_config_file(&config)?;
            let pool = thread_pool(threads.or(config.threads))?;
            progress.start("Tabulating ranges");
            let projector = PairProjector::new(config.pair_projection(config.range_table()?)?)?;
            progress.done();

            let controller = StreamingController::new(config.streaming(verbose))?;
            let mut source = pair_file(&input)?;
            progress.startln(&format!("Binning pairs from {}", input.display()));
            let (bins, summary) = pool.install(|| controller.run_pairs(&projector, &mut source))
                .map_err(report)?;
            progress.done_with_message(&format!("Binned: {summary}"));
            println!("{}", bins.tally);

            let mut projection: PairProjection<f32> = projector.finish(bins)?;
            if let Some(filler) = config.hole_filler {
                // Bins which no proton crossed are the holes
                let wepl = &mut projection.wepl;
                wepl.data.zip_mut_with(&projection.counts.data, |w, &n| if n == 0.0 { *w = f32::NAN });
                let report = filler.fill_projections_in_place(wepl);
                wepl.data.mapv_inplace(zero_nan);
                println!("{} empty bins filled, {} left", group_digits(report.filled), group_digits(report.left));
            }
            write_stack(&projection.wepl, &output)?;
            write_stack(&projection.counts, &beside(&output, "counts"))?;
            if let Some(noise) = &projection.noise { write_stack(noise, &beside(&output, "noise"))? }
            if let Some(scattering) = &projection.scattering { write_stack(scattering, &beside(&output, "scattering"))? }
            println!("Wrote {}", output.display());
        }

        Command::Backproject { config, input, output, angle } => {
            let config = read_config_file(&config)?;
            let pool = thread_pool(threads.or(config.threads))?;
            progress.start("Tabulating ranges");
            let projector = PairBackProjector::new(config.pair_back_projection(config.range_table()?, angle)?)?;
            progress.done();

            let controller = StreamingController::new(config.streaming(verbose))?;
            let mut source = pair_file(&input)?;
            progress.startln(&format!("Back-projecting pairs from {}", input.display()));
            let (sums, summary) = pool.install(|| controller.run_pairs(&projector, &mut source))
                .map_err(report)?;
            progress.done_with_message(&format!("Back-projected: {summary}"));
            println!("{}", sums.tally);

            let back_projection: PairBackProjection<f32> = projector.finish(sums)?;
            let mut volume = back_projection.normalised();
            if let Some(filler) = config.hole_filler {
                volume.data.zip_mut_with(&back_projection.weights.data, |v, &w| if w == 0.0 { *v = f32::NAN });
                let report = filler.fill_volume_in_place(&mut volume);
                volume.data.mapv_inplace(zero_nan);
                println!("{} empty voxels filled, {} left", group_digits(report.filled), group_digits(report.left));
            }
            publish_volume(&volume, &output)?;
            println!("Wrote {}", output.display());
        }
    }
    Ok(())
}

/// Holes which could not be filled revert to zero
fn zero_nan(v: f32) -> f32 { if v.is_nan() { 0.0 } else { v } }

fn thread_pool(threads: Option<usize>) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    let threads = threads.unwrap_or_else(rayon::current_num_threads);
    rayon::ThreadPoolBuilder::new().num_threads(threads).build()
}

/// Print how far a failed run got, and pass on the failure
fn report(failure: RunFailure) -> RunFailure {
    eprintln!("Run failed after {}", failure.summary);
    failure
}

/// `wepl.raw` -> `wepl-counts.raw`
fn beside(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match path.extension() {
        Some(extension) => format!("{stem}-{suffix}.{}", extension.to_string_lossy()),
        None            => format!("{stem}-{suffix}"),
    };
    path.with_file_name(name)
}

fn write_stack(stack: &ProjectionStack<f32>, path: &Path) -> protalo::Result<()> {
    let mut sink = RawFileSink::create(path)?;
    ProjectionSink::write(&mut sink, stack)?;
    ProjectionSink::<f32>::commit(&mut sink)
}

// ----- Imports -----------------------------------------------------------------------------------------
use std::{
    error::Error,
    path::{Path, PathBuf},
};

use clap::Parser;

use protalo::{
    config::read_config_file,
    image::ProjectionStack,
    io,
    pairs::{PairBackProjection, PairBackProjector, PairProjection, PairProjector},
    physics::RangeTable,
    simulate::{Beam, Simulation},
    streaming::{ProjectionSink, RawFileSink, RunFailure, StreamingController, pair_file, publish_volume},
    utils::{group_digits, timing::Progress},
};
