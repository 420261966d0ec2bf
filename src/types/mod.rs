//! Core data types and structures

pub mod market;
pub mod opportunity;
pub mod trade;
pub mod balance;
pub mod execution;
pub mod health;

pub use market::*;
pub use opportunity::*;
pub use trade::*;
pub use balance::*;
pub use execution::*;
pub use health::*;
