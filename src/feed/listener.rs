//! Task that applies pushed prices to the cache

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use super::{PriceCache, PriceUpdate};

/// Drains `updates` into `cache` until the channel closes or shutdown is signalled.
pub fn spawn_price_listener(
    cache: Arc<PriceCache>,
    mut updates: mpsc::Receiver<PriceUpdate>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("📡 Price listener started");
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(PriceUpdate { pair, quote }) => cache.on_quote(pair, quote),
                    None => {
                        debug!("Price channel closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("📡 Price listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Pair, PriceQuote};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn applies_updates_until_channel_closes() {
        let cache = Arc::new(PriceCache::new());
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_price_listener(cache.clone(), rx, shutdown_rx);

        tx.send(PriceUpdate { pair: Pair::XRP_USDC, quote: PriceQuote::new(dec!(0.51), dec!(20000)) })
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(cache.snapshot()[&Pair::XRP_USDC].price, dec!(0.51));
    }
}
