//! Random-walk prices for paper trading

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;
use crate::{
    errors::BotResult,
    types::{Pair, PriceMap, PriceQuote},
};
use super::{PriceFeed, PriceUpdate};

const PAIRS: [Pair; 2] = [Pair::XRP_USDT, Pair::XRP_USDC];

struct WalkState {
    mid: f64,
    /// Per-pair premium over the mid, as a fraction
    premium: [f64; 2],
}

/// Shared mid price with a mean-reverting premium per stablecoin pair, so the
/// two pairs drift apart now and then.
pub struct SimulatedFeed {
    state: Mutex<WalkState>,
    step_volatility: f64,
    max_premium: f64,
}

impl SimulatedFeed {
    pub fn new(start_price: Decimal) -> Self {
        Self {
            state: Mutex::new(WalkState { mid: start_price.to_f64().unwrap_or(0.5), premium: [0.0; 2] }),
            step_volatility: 0.0008,
            max_premium: 0.004,
        }
    }

    fn step(&self) -> PriceMap {
        let mut rng = rand::rng();
        let mut state = self.state.lock();
        state.mid *= 1.0 + rng.random_range(-self.step_volatility..self.step_volatility);
        for premium in state.premium.iter_mut() {
            let shock = rng.random_range(-0.0015..0.0015);
            *premium = (*premium * 0.7 + shock).clamp(-self.max_premium, self.max_premium);
        }

        let now = chrono::Utc::now();
        PAIRS
            .iter()
            .zip(state.premium.iter())
            .map(|(pair, premium)| {
                let price = Decimal::from_f64(state.mid * (1.0 + premium))
                    .unwrap_or(dec!(0.5))
                    .round_dp(6);
                let volume = Decimal::from(rng.random_range(20_000u32..2_000_000u32));
                (*pair, PriceQuote { price, volume, timestamp: now })
            })
            .collect()
    }

    /// Pushes a fresh step every `every` until shutdown or the receiver goes away.
    pub fn spawn_push(
        self: std::sync::Arc<Self>,
        updates: mpsc::Sender<PriceUpdate>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for (pair, quote) in self.step() {
                            if updates.send(PriceUpdate { pair, quote }).await.is_err() {
                                debug!("Price receiver dropped, stopping simulated push");
                                return;
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl PriceFeed for SimulatedFeed {
    async fn get_current_prices(&self) -> BotResult<PriceMap> {
        Ok(self.step())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn quotes_both_pairs_near_start() {
        let feed = SimulatedFeed::new(dec!(0.5));
        for _ in 0..50 {
            let prices = feed.get_current_prices().await.unwrap();
            assert_eq!(prices.len(), 2);
            for quote in prices.values() {
                assert!(quote.price > dec!(0.4) && quote.price < dec!(0.6));
                assert!(quote.volume >= dec!(20000));
            }
        }
    }
}
