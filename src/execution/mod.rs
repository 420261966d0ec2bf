//! Order execution

pub mod executor;

pub use executor::*;
