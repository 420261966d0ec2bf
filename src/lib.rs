//! XRP Arbitrage Bot - spread arbitrage between XRP/USDT and XRP/USDC
//!
//! Watches both pairs for a stablecoin spread wide enough to pay the fees,
//! sells on the rich pair, buys back on the cheap one, and supervises every
//! order until it reaches a terminal state. Balances are tracked in a ledger
//! that locks funds for in-flight orders.

pub mod config;
pub mod types;
pub mod errors;
pub mod network;
pub mod feed;
pub mod exchange;
pub mod ledger;
pub mod storage;
pub mod arbitrage;
pub mod risk;
pub mod analytics;
pub mod execution;
pub mod supervisor;
pub mod engine;
pub mod utils;

// Re-export commonly used items
pub use config::{Config, CONFIG};
pub use errors::{BotError, BotResult};
pub use types::*;
