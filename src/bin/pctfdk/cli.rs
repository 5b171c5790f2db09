#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "pctfdk", about = "Weight, filter and back-project a series of cone-beam projections")]
pub struct Cli {

    /// TOML file with [geometry], [detector] and [volume] sections
    #[clap(short, long)]
    pub config: PathBuf,

    /// Projections as raw little-endian f32, indexed [projection, v, u]
    #[clap(short, long)]
    pub input: PathBuf,

    /// Where to write the volume (or the weighted projections, with
    /// `--weight-only`)
    #[clap(short, long, default_value = "volume.raw")]
    pub output: PathBuf,

    /// Stop after weighting and filtering: write the weighted projections
    #[clap(long)]
    pub weight_only: bool,

    /// Override the number of chunks given in the config file
    #[clap(short, long)]
    pub divisions: Option<usize>,

    /// Maximum number of rayon threads; overrides the config file
    #[clap(short = 'j', long)]
    pub threads: Option<usize>,

    /// Show progress bars
    #[clap(short, long)]
    pub verbose: bool,
}

// ----- Imports -----------------------------------------------------------------------------------------
use std::path::PathBuf;
