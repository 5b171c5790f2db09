#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "pctpairs", about = "Turn proton pairs into projections or back-projections, or simulate some")]
pub struct Cli {

    /// Maximum number of rayon threads; overrides the config file
    #[clap(short = 'j', long, global = true)]
    pub threads: Option<usize>,

    /// Show progress bars
    #[clap(short, long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug, Clone)]
pub enum Command {

    /// Bin pairs into depth-resolved projections of mean WEPL
    Project {
        /// TOML file with [detector], [pairs], [mlp] and [material] sections
        #[clap(short, long)]
        config: PathBuf,

        /// Binary proton-pair records
        #[clap(short, long)]
        input: PathBuf,

        /// Mean WEPL projections; counts, noise and scattering images are
        /// written beside it with `-counts`, `-noise`, `-scattering` suffixes
        #[clap(short, long, default_value = "wepl.raw")]
        output: PathBuf,
    },

    /// Apportion the WEPL of each pair among the voxels along its path
    Backproject {
        /// TOML file with [volume], [pairs], [mlp] and [material] sections
        #[clap(short, long)]
        config: PathBuf,

        /// Binary proton-pair records
        #[clap(short, long)]
        input: PathBuf,

        /// Normalised back-projection
        #[clap(short, long, default_value = "backprojection.raw")]
        output: PathBuf,

        /// Gantry angle at which the pairs were measured (e.g. '90 deg')
        #[clap(short, long, value_parser = parse_uom::<Angle>)]
        angle: Option<Angle>,
    },

    /// Generate pairs through a water cylinder
    Simulate {
        /// Where to write the binary proton-pair records
        #[clap(short, long, default_value = "pairs.bin")]
        output: PathBuf,

        /// Number of protons to shoot
        #[clap(short, long, default_value = "100000")]
        n: usize,

        /// Seed of the random number generator
        #[clap(long, default_value = "1")]
        seed: u64,

        #[clap(long, default_value = "200 MeV", value_parser = parse_uom::<Energy>)]
        energy: Energy,

        /// Standard deviation of the beam's transverse profile
        #[clap(long, default_value = "40 mm", value_parser = parse_uom::<Length>)]
        spot_size: Length,

        /// Standard deviation of the protons' initial angles
        #[clap(long, default_value = "0.005 rad", value_parser = parse_uom::<Angle>)]
        divergence: Angle,

        /// Distance of the trackers from the isocentre
        #[clap(long, default_value = "150 mm", value_parser = parse_uom::<Length>)]
        tracker_distance: Length,

        /// Radius of the water cylinder
        #[clap(long, default_value = "100 mm", value_parser = parse_uom::<Length>)]
        radius: Length,

        /// Switch off multiple scattering
        #[clap(long)]
        no_scattering: bool,
    },
}

// ----- Imports -----------------------------------------------------------------------------------------
use std::path::PathBuf;

use protalo::config::parse_uom;
use units::{Angle, Energy, Length};
