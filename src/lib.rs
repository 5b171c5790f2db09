//! Proton and cone-beam CT reconstruction.
//!
//! Photon projections are weighted (`weighting`) and back-projected into a
//! volume (`projector`). Proton pairs are turned into most likely paths
//! (`mlp`) whose water-equivalent path lengths (`physics`) are either binned
//! into depth-resolved projections or apportioned among the voxels they cross
//! (`pairs`). `streaming` runs either pipeline over inputs too large to hold
//! in memory at once.

mod types;
pub use types::*;

pub mod error;
pub use error::{Error, PairDefect, Result};

pub mod circular;
pub mod fov;
pub mod image;
pub mod physics;
pub mod mlp;
pub mod weighting;
pub mod projector;
pub mod pairs;
pub mod hole_filler;
pub mod streaming;
pub mod config;
pub mod io;
pub mod simulate;
pub mod utils;
