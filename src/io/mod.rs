//! Minimal file formats: raw float arrays for projections and volumes, and
//! binary proton-pair records.

pub mod raw;
pub mod pairs;
