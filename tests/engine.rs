mod common;

use common::{Harness, BUY_PRICE, SELL_PRICE};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use xrp_arb_bot::{
    arbitrage::NoOpportunity,
    config::{Config, ConfigSource, SharedTradingConfig, TradingConfig},
    engine::{CycleOutcome, EngineLoop},
    errors::{Alert, BotError, BotResult, BreakerCategory},
    exchange::FillMode,
    feed::{PriceCache, PriceSources},
    storage::Store,
    types::{Currency, ExecutionStatus, Pair, TradeSide, TradeStatus},
};

struct RefusedConfig;

impl ConfigSource for RefusedConfig {
    fn snapshot(&self) -> BotResult<TradingConfig> {
        Err(BotError::Validation { reason: "config service unavailable".into() })
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.execution = Harness::execution_settings();
    config
}

fn engine_with(harness: &Harness, cache: Arc<PriceCache>, trading: Arc<dyn ConfigSource>) -> EngineLoop {
    EngineLoop::new(
        &test_config(),
        trading,
        harness.store(),
        harness.ledger.clone(),
        harness.connector(),
        PriceSources::new(cache, None, 10),
        harness.alerts.clone(),
    )
}

fn engine(harness: &Harness, cache: Arc<PriceCache>) -> EngineLoop {
    engine_with(harness, cache, Arc::new(SharedTradingConfig::default()))
}

fn push_prices(cache: &PriceCache, usdt: Decimal, usdc: Decimal) {
    cache.on_price(Pair::XRP_USDT, usdt, dec!(50000));
    cache.on_price(Pair::XRP_USDC, usdc, dec!(50000));
}

#[tokio::test]
async fn cycle_detects_and_executes() {
    let harness = Harness::funded();
    let cache = Arc::new(PriceCache::new());
    push_prices(&cache, SELL_PRICE, BUY_PRICE);
    let engine = engine(&harness, cache);

    assert_eq!(engine.run_cycle().await, CycleOutcome::Executed(ExecutionStatus::Completed));

    let trades = harness.store.all_trades();
    assert_eq!(trades.len(), 2);
    assert!(trades.iter().all(|t| t.status == TradeStatus::Completed));
    let opportunity_id = trades[0].opportunity_id.clone().unwrap();
    assert!(harness.store.opportunity(&opportunity_id).unwrap().unwrap().executed);

    let status = assert_ok!(engine.status().await);
    assert!(status.cumulative_pnl > Decimal::ZERO);
    assert_eq!(status.today.completed_today, 2);
    assert_eq!(status.pending_orders, 0);
    assert!(status.health.healthy);
    assert!(!status.running);

    // Prices were kept as history for the volatility check.
    let since = chrono::Utc::now() - chrono::Duration::minutes(1);
    assert_eq!(harness.store.recent_prices(Pair::XRP_USDT, since, 10).unwrap().len(), 1);

    // Same spread again right away: the frequency limit holds it back.
    match engine.run_cycle().await {
        CycleOutcome::Rejected(reason) => assert!(reason.starts_with("Trading too frequently")),
        other => panic!("expected a risk rejection, got {other:?}"),
    }
    assert_eq!(harness.store.all_trades().len(), 2);
}

#[tokio::test]
async fn flat_prices_produce_nothing() {
    let harness = Harness::funded();
    let cache = Arc::new(PriceCache::new());
    push_prices(&cache, dec!(0.52), dec!(0.52));
    let engine = engine(&harness, cache);

    assert!(matches!(
        engine.run_cycle().await,
        CycleOutcome::NoOpportunity(NoOpportunity::SpreadTooSmall { .. })
    ));
    assert!(harness.exchange.calls().is_empty());
}

#[tokio::test]
async fn active_breaker_blocks_execution() {
    let harness = Harness::funded();
    let cache = Arc::new(PriceCache::new());
    push_prices(&cache, SELL_PRICE, BUY_PRICE);
    let engine = engine(&harness, cache);
    engine.breaker().trip(BreakerCategory::LargeLoss, "operator test", 4, 3).await;

    assert_eq!(engine.run_cycle().await, CycleOutcome::Halted(BreakerCategory::LargeLoss));
    assert!(harness.store.all_trades().is_empty());
    assert_eq!(engine.session_stats().opportunities, 1);

    engine.breaker().reset(BreakerCategory::LargeLoss).await;
    assert_eq!(engine.run_cycle().await, CycleOutcome::Executed(ExecutionStatus::Completed));
}

#[tokio::test]
async fn partial_execution_alerts_and_halts() {
    let harness = Harness::funded();
    harness
        .exchange
        .set_fill_mode(TradeSide::Buy, FillMode::Reject("buy side down".into()));
    let mut alerts = harness.alerts.subscribe();
    let cache = Arc::new(PriceCache::new());
    push_prices(&cache, SELL_PRICE, BUY_PRICE);
    let engine = engine(&harness, cache);

    assert_eq!(engine.run_cycle().await, CycleOutcome::Executed(ExecutionStatus::PartialFailure));
    assert!(engine.breaker().is_active(BreakerCategory::UnhedgedPosition).await);

    let mut saw_partial = false;
    let mut saw_breaker = false;
    while let Ok(alert) = alerts.try_recv() {
        match alert {
            Alert::PartialExecution { unhedged_amount, .. } => {
                assert!(unhedged_amount > Decimal::ZERO);
                saw_partial = true;
            }
            Alert::CircuitBreakerActivated { category, .. } => {
                assert_eq!(category, BreakerCategory::UnhedgedPosition);
                saw_breaker = true;
            }
            Alert::HealthCheckFailed { .. } | Alert::SettlementRejected { .. } => {
                panic!("unexpected alert: {alert:?}")
            }
        }
    }
    assert!(saw_partial && saw_breaker);

    assert_eq!(engine.run_cycle().await, CycleOutcome::Halted(BreakerCategory::UnhedgedPosition));
    assert_eq!(engine.session_stats().partial_failures, 1);
}

#[tokio::test]
async fn failed_health_check_is_retried_next_cycle() {
    let harness = Harness::funded();
    let mut alerts = harness.alerts.subscribe();
    let engine = engine(&harness, Arc::new(PriceCache::new()));

    harness.store.set_offline(true);
    match engine.run_cycle().await {
        CycleOutcome::Unhealthy(errors) => {
            assert!(errors.iter().any(|e| e.starts_with("Database connection error")))
        }
        other => panic!("expected an unhealthy cycle, got {other:?}"),
    }
    assert!(matches!(alerts.try_recv(), Ok(Alert::HealthCheckFailed { .. })));

    harness.store.set_offline(false);
    assert_eq!(engine.run_cycle().await, CycleOutcome::NoPrices);
}

#[tokio::test]
async fn refused_configuration_skips_the_cycle() {
    let harness = Harness::funded();
    let cache = Arc::new(PriceCache::new());
    push_prices(&cache, SELL_PRICE, BUY_PRICE);
    let engine = engine_with(&harness, cache, Arc::new(RefusedConfig));

    assert!(matches!(engine.run_cycle().await, CycleOutcome::Skipped(_)));
    assert!(harness.exchange.calls().is_empty());
}

#[tokio::test]
async fn updated_configuration_applies_next_cycle() {
    let harness = Harness::funded();
    let cache = Arc::new(PriceCache::new());
    push_prices(&cache, SELL_PRICE, BUY_PRICE);
    let shared = SharedTradingConfig::default();
    let engine = engine_with(&harness, cache, Arc::new(shared.clone()));

    shared
        .update(TradingConfig { spread_threshold: dec!(0.005), ..TradingConfig::default() })
        .unwrap();
    assert!(matches!(
        engine.run_cycle().await,
        CycleOutcome::NoOpportunity(NoOpportunity::SpreadTooSmall { .. })
    ));
}

#[tokio::test]
async fn stop_cancels_pending_orders() {
    let harness = Harness::funded();
    harness.exchange.set_fill_mode(TradeSide::Sell, FillMode::Never);
    let cache = Arc::new(PriceCache::new());
    push_prices(&cache, SELL_PRICE, BUY_PRICE);
    let engine = Arc::new(engine(&harness, cache));

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };

    let mut pending = Vec::new();
    for _ in 0..200 {
        pending = harness.store.pending_trades().unwrap();
        if !pending.is_empty() && engine.session_stats().executions == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pending.len(), 1);
    assert!(engine.is_running());
    assert_eq!(harness.balance(Currency::Xrp).locked, pending[0].amount);

    engine.stop();
    let result = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("engine stopped in time")
        .expect("engine task");
    assert_ok!(result);

    assert!(!engine.is_running());
    assert_eq!(
        harness.store.trade(&pending[0].id).unwrap().unwrap().status,
        TradeStatus::Cancelled
    );
    let xrp = harness.balance(Currency::Xrp);
    assert_eq!((xrp.total, xrp.locked), (dec!(1000), dec!(0)));
}
