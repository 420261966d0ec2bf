//! Transient-failure handling for external calls

pub mod retry;

pub use retry::*;
