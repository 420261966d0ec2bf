//! Price feeds: push cache, poll fallback and listener tasks

pub mod cache;
pub mod sources;
pub mod listener;
pub mod simulated;

pub use cache::*;
pub use sources::*;
pub use listener::*;
pub use simulated::*;

use async_trait::async_trait;
use crate::{
    errors::BotResult,
    types::{Pair, PriceMap, PriceQuote},
};

/// Poll contract of an external price source
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn get_current_prices(&self) -> BotResult<PriceMap>;
}

/// One pushed price, as delivered to a listener task
#[derive(Debug, Clone, Copy)]
pub struct PriceUpdate {
    pub pair: Pair,
    pub quote: PriceQuote,
}
