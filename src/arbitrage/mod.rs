//! Arbitrage opportunity detection

pub mod detector;

pub use detector::*;
