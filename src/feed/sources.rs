//! Push-first price selection with poll fallback

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};
use crate::{
    network::{retry_with_backoff, RetryConfig},
    types::{Pair, PriceMap, PriceSource},
};
use super::{PriceCache, PriceFeed};

pub struct PriceSources {
    cache: Arc<PriceCache>,
    poll: Option<Arc<dyn PriceFeed>>,
    staleness_secs: i64,
    retry: RetryConfig,
}

impl PriceSources {
    pub fn new(cache: Arc<PriceCache>, poll: Option<Arc<dyn PriceFeed>>, staleness_secs: i64) -> Self {
        Self { cache, poll, staleness_secs, retry: RetryConfig::default() }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    /// Fresh pushed prices win. Otherwise the poll source is asked; a poll
    /// failure is logged and reported as no prices for this cycle.
    pub async fn current(&self, pairs: &[Pair]) -> Option<(PriceMap, PriceSource)> {
        if let Some(prices) = self.cache.fresh(pairs, Utc::now(), self.staleness_secs) {
            return Some((prices, PriceSource::Push));
        }

        let poll = self.poll.as_ref()?;
        debug!("Push prices missing or stale, polling");
        match retry_with_backoff(|| poll.get_current_prices(), &self.retry, "price poll").await {
            Ok(prices) if pairs.iter().all(|p| prices.contains_key(p)) => Some((prices, PriceSource::Poll)),
            Ok(prices) => {
                warn!(received = prices.len(), "Poll returned incomplete prices");
                None
            }
            Err(e) => {
                warn!("Price poll failed: {}", e);
                None
            }
        }
    }
}
