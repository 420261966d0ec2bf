//! XRP Arbitrage Bot - Main Entry Point
//!
//! Paper-trading runner: simulated prices, simulated fills, real engine.

use xrp_arb_bot::*;
use anyhow::Result;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use xrp_arb_bot::{
    config::SharedTradingConfig,
    engine::EngineLoop,
    errors::AlertBus,
    exchange::PaperExchange,
    feed::{spawn_price_listener, PriceCache, PriceFeed, PriceSources, SimulatedFeed},
    ledger::BalanceLedger,
    storage::{MemoryStore, Store},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = CONFIG.clone();
    let output_dir = config.paper.output_dir.clone();

    utils::setup_output_directories(&output_dir)?;
    let _logging_guard = utils::setup_logging(&output_dir)?;

    info!("🪙  XRP Arbitrage Bot v{} - paper trading", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration:");
    info!("   Trade Amount: {} XRP", config.trading.trade_amount);
    info!("   Spread Threshold: {}%", config.trading.spread_threshold * dec!(100));
    info!("   Daily Max Volume: {} XRP", config.trading.daily_max_volume);
    info!("   Risk Buffer: {}", config.trading.risk_buffer);
    info!("   Max Pending Orders: {}", config.trading.max_pending_orders);
    info!("   Taker Fee: {}%", config.detector.taker_fee_rate * dec!(100));
    info!("   Output: {}", output_dir.display());

    let store: Arc<dyn Store> = Arc::new(MemoryStore::with_journal(output_dir.clone()));
    let ledger = Arc::new(BalanceLedger::with_balances(
        store.clone(),
        &[
            (Currency::Xrp, config.paper.initial_xrp),
            (Currency::Usdt, config.paper.initial_usdt),
            (Currency::Usdc, config.paper.initial_usdc),
        ],
    )?);

    // Pushed prices feed the cache; the same walk is the polling fallback.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (updates_tx, updates_rx) = mpsc::channel(256);
    let cache = Arc::new(PriceCache::new());
    let simulated = Arc::new(SimulatedFeed::new(dec!(0.52)));
    let listener = spawn_price_listener(cache.clone(), updates_rx, shutdown_rx.clone());
    let pusher = simulated.clone().spawn_push(updates_tx, Duration::from_secs(1), shutdown_rx);

    let poll: Arc<dyn PriceFeed> = simulated;
    let sources = PriceSources::new(cache.clone(), Some(poll), config.detector.price_staleness_secs);
    let exchange = Arc::new(
        PaperExchange::new()
            .with_price_cache(cache)
            .with_latency(Duration::from_millis(50))
            .with_slippage_bps(2),
    );

    let alerts = AlertBus::default();
    let engine = Arc::new(EngineLoop::new(
        &config,
        Arc::new(SharedTradingConfig::new(config.trading.clone())),
        store,
        ledger,
        exchange,
        sources,
        alerts,
    ));

    info!("\n🚀 Starting engine...\n");
    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };

    tokio::signal::ctrl_c().await?;
    info!("\n📛 Received shutdown signal (Ctrl+C)...");
    engine.stop();
    let _ = shutdown_tx.send(true);

    match runner.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Engine exited with error: {}", e),
        Err(e) => error!("Engine task panicked: {}", e),
    }
    let _ = tokio::join!(listener, pusher);

    match engine.status().await {
        Ok(status) => info!("Final status: {}", serde_json::to_string_pretty(&status)?),
        Err(e) => error!("Could not read final status: {}", e),
    }

    Ok(())
}
