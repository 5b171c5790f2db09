//! Errors raised by the reconstruction engine.
//!
//! Configuration problems (`GeometryMismatch`, `IndexOutOfRange`,
//! `UnsupportedDegree`, `InvalidConfig`) are fatal and surface before any data
//! are processed. Per-pair problems (`InvalidPair`, `NumericDivergence`) are
//! caught by the pair accumulators, tallied and skipped.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("geometry describes {geometry} projections but {supplied} were supplied")]
    GeometryMismatch { geometry: usize, supplied: usize },

    #[error("index {index} out of range for {count} items")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("invalid proton pair: {0}")]
    InvalidPair(PairDefect),

    #[error("numeric divergence: {0}")]
    NumericDivergence(String),

    #[error("polynomial degree {degree} not supported (supported degrees: 1 to 5)")]
    UnsupportedDegree { degree: usize },

    #[error("invalid energy {0} MeV")]
    InvalidEnergy(f64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("run aborted after {chunks} chunks")]
    Aborted { chunks: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Record(#[from] binrw::Error),
}

/// Why a proton pair was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PairDefect {
    #[error("non-finite component")]
    NonFinite,

    #[error("zero-length direction")]
    ZeroDirection,

    #[error("entry and exit positions coincide")]
    CoincidentEndpoints,

    #[error("particle does not travel downstream")]
    Backwards,

    #[error("exit energy not below entry energy")]
    NoEnergyLoss,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<PairDefect> for Error {
    fn from(defect: PairDefect) -> Self { Error::InvalidPair(defect) }
}
