#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "fill_holes", about = "Fill small holes in a raw f32 volume")]
pub struct Cli {

    /// Volume as raw little-endian f32, x varying fastest
    #[clap(short, long)]
    pub input: PathBuf,

    /// Where to write the filled volume
    #[clap(short, long)]
    pub output: PathBuf,

    /// Number of voxels along x, y and z (e.g. '128,128,64')
    #[clap(short, long, value_parser = parse_triplet::<usize>)]
    pub shape: (usize, usize, usize),

    /// Values below this, and NaNs, are holes
    #[clap(short, long, default_value = "0")]
    pub threshold: f64,

    /// Largest connected hole which is filled
    #[clap(short, long, default_value = "4")]
    pub max_hole_size: usize,
}

fn main() -> Result<(), Box<dyn Error>> {

    let Cli { input, output, shape: (nx, ny, nz), threshold, max_hole_size } = Cli::parse();
    let mut progress = Progress::new();

    progress.start(&format!("Reading {}", input.display()));
    let values = raw::read(&input)?.collect::<Result<Vec<_>, _>>()?;
    let fov = FOV::with_origin([nx, ny, nz], [1.0; 3], [0.0; 3])?;
    let mut volume = Volume::from_vec(fov, values)?;
    progress.done();

    progress.start("Filling holes");
    let report = HoleFiller::new(threshold, max_hole_size).fill_volume_in_place(&mut volume);
    progress.done_with_message(&format!("{} voxels filled, {} left",
                                        group_digits(report.filled), group_digits(report.left)));

    publish_volume(&volume, &output)?;
    println!("Wrote {}", output.display());
    Ok(())
}

// ----- Imports -----------------------------------------------------------------------------------------
use std::{
    error::Error,
    path::PathBuf,
};

use clap::Parser;

use protalo::{
    fov::FOV,
    hole_filler::HoleFiller,
    image::Volume,
    io::raw,
    streaming::publish_volume,
    utils::{group_digits, parse_triplet, timing::Progress},
};
