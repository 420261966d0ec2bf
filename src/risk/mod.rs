//! Risk gating

pub mod controller;

pub use controller::*;
