//! Market analytics heuristics

pub mod spread;

pub use spread::*;
