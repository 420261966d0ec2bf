//! Configuration management for the arbitrage bot

pub mod settings;
pub mod trading;

pub use settings::*;
pub use trading::*;

use lazy_static::lazy_static;

lazy_static! {
    pub static ref CONFIG: Config = Config::load();
}
