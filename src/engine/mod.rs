//! Main trading loop

pub mod engine_loop;

pub use engine_loop::*;
