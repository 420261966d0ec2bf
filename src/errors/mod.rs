//! Error handling, recovery and circuit breaking

pub mod bot_error;
pub mod recovery;
pub mod circuit_breaker;
pub mod alerts;

pub use bot_error::*;
pub use recovery::*;
pub use circuit_breaker::*;
pub use alerts::*;
