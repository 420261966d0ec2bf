//! Pending order supervision

pub mod order_supervisor;

pub use order_supervisor::*;
