//! Back-projection of photon projections into volumes.
//!
//! Each worker owns a disjoint set of z-slices of the target volume, so no
//! voxel is ever updated by two threads. Within a voxel, projections are
//! accumulated in series order: back-projecting a series in chunks gives
//! bit-for-bit the same volume as back-projecting it in one go.

pub mod siddon;
mod zeng;
mod distance_driven;

pub use siddon::{SystemMatrixRow, update_row};
pub use zeng::Zeng;
pub use distance_driven::DistanceDriven;

use serde::Deserialize;

use crate::circular::{CircularGeometry, ProjectionFrame};
use crate::error::{Error, Result};
use crate::image::{ProjectionStack, Volume};
use crate::types::Sample;

/// Abstract interface for photon back-projection implementations
pub trait BackProjector {
    /// Add the back-projection of `stack` to `volume`. The projections'
    /// geometry is looked up in `geometry` by their index in the series.
    fn back_project<T: Sample>(
        &self,
        stack   : &ProjectionStack<T>,
        geometry: &CircularGeometry,
        volume  : &mut Volume<T>,
    ) -> Result<()>;
}

/// Configuration tag selecting a back-projector
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectorKind {
    #[default]
    Zeng,
    DistanceDriven,
}

#[derive(Debug, Clone, Copy)]
pub enum Projector {
    Zeng(Zeng),
    DistanceDriven(DistanceDriven),
}

impl Projector {
    pub fn new(kind: ProjectorKind) -> Self {
        match kind {
            ProjectorKind::Zeng           => Projector::Zeng(Zeng),
            ProjectorKind::DistanceDriven => Projector::DistanceDriven(DistanceDriven),
        }
    }
}

impl BackProjector for Projector {
    fn back_project<T: Sample>(&self, stack: &ProjectionStack<T>, geometry: &CircularGeometry, volume: &mut Volume<T>) -> Result<()> {
        match self {
            Projector::Zeng(p)           => p.back_project(stack, geometry, volume),
            Projector::DistanceDriven(p) => p.back_project(stack, geometry, volume),
        }
    }
}

/// Frames of the projections in `stack`, failing if the stack reaches beyond
/// the end of the series described by `geometry`.
pub(crate) fn frames_of<T: Sample>(stack: &ProjectionStack<T>, geometry: &CircularGeometry) -> Result<Vec<ProjectionFrame>> {
    let count = geometry.count();
    let end = stack.indices().end;
    if end > count {
        return Err(Error::IndexOutOfRange { index: end - 1, count })
    }
    stack.indices().map(|i| geometry.frame(i)).collect()
}

/// Inverse-square weight of a voxel at `depth` along the beam, relative to
/// the isocentre.
pub(crate) fn distance_weight(frame: &ProjectionFrame, depth: f64) -> f64 {
    if frame.is_parallel() { return 1.0 }
    let r = frame.sid / (frame.sid + depth);
    r * r
}

pub fn elementwise_add<T: Sample>(mut a: Vec<T>, b: Vec<T>) -> Vec<T> {
    a.iter_mut().zip(b).for_each(|(l, r)| *l += r);
    a
}
