//! Latest pushed prices

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;
use crate::types::{Pair, PriceMap, PriceQuote};

/// Snapshot of the most recent push update per pair. Readers never block;
/// writers swap in a new map and bump a version that wakes subscribers.
pub struct PriceCache {
    latest: ArcSwap<PriceMap>,
    version: watch::Sender<u64>,
}

impl PriceCache {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self { latest: ArcSwap::from_pointee(PriceMap::new()), version }
    }

    /// Push contract: records a price for `pair` stamped with the current time.
    pub fn on_price(&self, pair: Pair, price: Decimal, volume: Decimal) {
        self.on_quote(pair, PriceQuote::new(price, volume));
    }

    pub fn on_quote(&self, pair: Pair, quote: PriceQuote) {
        self.latest.rcu(|current| {
            let mut next = PriceMap::clone(current);
            next.insert(pair, quote);
            next
        });
        self.version.send_modify(|v| *v = v.wrapping_add(1));
        trace!(%pair, price = %quote.price, "Price pushed");
    }

    pub fn snapshot(&self) -> Arc<PriceMap> {
        self.latest.load_full()
    }

    /// Prices for every requested pair, provided each is younger than `max_age_secs`.
    pub fn fresh(&self, pairs: &[Pair], now: DateTime<Utc>, max_age_secs: i64) -> Option<PriceMap> {
        let snapshot = self.latest.load();
        pairs
            .iter()
            .map(|pair| {
                snapshot
                    .get(pair)
                    .filter(|q| q.age_secs(now) <= max_age_secs)
                    .map(|q| (*pair, *q))
            })
            .collect()
    }

    /// Receiver that changes whenever a price is pushed.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new()
    }
}
