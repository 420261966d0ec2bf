//! Detection, risk gating and execution loop

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::prelude::*;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Level};
use crate::{
    analytics::SpreadAnalytics,
    arbitrage::{NoOpportunity, OpportunityDetector},
    config::{Config, ConfigSource, EngineSettings},
    errors::{
        Alert, AlertBus, BotError, BotResult, BreakerCategory, BreakerState, CircuitBreaker, ErrorRecovery,
        RecoveryAction,
    },
    exchange::ExchangeConnector,
    execution::OrderExecutor,
    feed::{PriceCache, PriceSources},
    ledger::BalanceLedger,
    risk::{RiskController, Verdict},
    storage::Store,
    supervisor::{OrderSupervisor, SupervisorStats},
    types::{Balance, Currency, ExecutionOutcome, ExecutionStatus, OrderType, PriceMap, PriceSample, SystemHealth},
    utils::{display_execution, display_opportunity, display_session_stats},
};

/// What a single cycle ended with
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The configuration snapshot was refused
    Skipped(String),
    Unhealthy(Vec<String>),
    NoPrices,
    NoOpportunity(NoOpportunity),
    /// Opportunity recorded but execution is blocked by an active breaker
    Halted(BreakerCategory),
    Rejected(String),
    Executed(ExecutionStatus),
    Failed(String),
}

/// A stablecoin transfer made by maintenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rebalance {
    pub from: Currency,
    pub to: Currency,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub cycles: u64,
    pub current_interval_ms: u64,
    pub today: SupervisorStats,
    pub pending_orders: usize,
    pub health: SystemHealth,
    pub breakers: Vec<BreakerState>,
    pub balances: Vec<Balance>,
    pub cumulative_pnl: Decimal,
}

/// Counters behind the session summary
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub started: Instant,
    pub cycles: u64,
    pub opportunities: u64,
    pub rejected: u64,
    pub executions: u64,
    pub completed: u64,
    pub partial_failures: u64,
    pub cumulative_pnl: Decimal,
}

impl SessionStats {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            cycles: 0,
            opportunities: 0,
            rejected: 0,
            executions: 0,
            completed: 0,
            partial_failures: 0,
            cumulative_pnl: Decimal::ZERO,
        }
    }
}

pub struct EngineLoop {
    settings: EngineSettings,
    trading: Arc<dyn ConfigSource>,
    store: Arc<dyn Store>,
    ledger: Arc<BalanceLedger>,
    cache: Arc<PriceCache>,
    detector: OpportunityDetector,
    risk: RiskController,
    executor: OrderExecutor,
    supervisor: OrderSupervisor,
    breaker: Arc<CircuitBreaker>,
    alerts: AlertBus,
    recovery: ErrorRecovery,
    analytics: Mutex<SpreadAnalytics>,
    stats: Mutex<SessionStats>,
    /// Whether each of the last cycles found an opportunity
    activity: Mutex<VecDeque<bool>>,
    cycle: AtomicU64,
    interval_ms: AtomicU64,
    health_failed: AtomicBool,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl EngineLoop {
    pub fn new(
        config: &Config,
        trading: Arc<dyn ConfigSource>,
        store: Arc<dyn Store>,
        ledger: Arc<BalanceLedger>,
        exchange: Arc<dyn ExchangeConnector>,
        sources: PriceSources,
        alerts: AlertBus,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(config.engine.breaker_window, alerts.clone()));
        let cache = sources.cache().clone();
        let (shutdown, _) = watch::channel(false);
        Self {
            detector: OpportunityDetector::new(config.detector.clone(), sources),
            risk: RiskController::new(config.risk.clone(), ledger.clone(), store.clone()),
            executor: OrderExecutor::new(config.execution.clone(), ledger.clone(), store.clone(), exchange.clone()),
            supervisor: OrderSupervisor::new(
                config.supervisor.clone(),
                ledger.clone(),
                store.clone(),
                exchange,
                config.execution.call_timeout,
                breaker.clone(),
                alerts.clone(),
            ),
            interval_ms: AtomicU64::new(config.engine.base_interval.as_millis() as u64),
            settings: config.engine.clone(),
            trading,
            store,
            ledger,
            cache,
            breaker,
            alerts,
            recovery: ErrorRecovery::new(),
            analytics: Mutex::new(SpreadAnalytics::default()),
            stats: Mutex::new(SessionStats::new()),
            activity: Mutex::new(VecDeque::new()),
            cycle: AtomicU64::new(0),
            health_failed: AtomicBool::new(false),
            running: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn supervisor(&self) -> &OrderSupervisor {
        &self.supervisor
    }

    pub fn session_stats(&self) -> SessionStats {
        self.stats.lock().clone()
    }

    /// Runs the detection loop and the supervision loop until [`EngineLoop::stop`]
    /// is called, then force-cancels whatever is still pending.
    pub async fn run(&self) -> BotResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BotError::Validation { reason: "engine is already running".into() });
        }
        info!("🚀 Engine started (base interval {:?})", self.settings.base_interval);

        tokio::join!(self.detection_loop(), self.supervisor.run(self.shutdown.subscribe()));

        let cancelled = match self.supervisor.force_cancel_all().await {
            Ok(n) => n,
            Err(e) => {
                error!("Force cancel at shutdown failed: {}", e);
                0
            }
        };
        self.running.store(false, Ordering::SeqCst);
        display_session_stats(&self.session_stats(), &self.breaker.states().await);
        info!(cancelled, "🛑 Engine stopped");
        Ok(())
    }

    /// Signals both loops to stop. `run` returns once they have.
    pub fn stop(&self) {
        info!("📛 Stop requested");
        self.shutdown.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn detection_loop(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut prices = self.cache.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }
            prices.borrow_and_update();

            let delay = match self.run_cycle().await {
                CycleOutcome::Unhealthy(_) => self.settings.health_retry_delay,
                _ => self.next_interval(),
            };
            let floor = self.settings.min_interval.min(delay);

            // Never poll faster than the floor, even when prices are pushed.
            tokio::select! {
                _ = tokio::time::sleep(floor) => {}
                _ = shutdown.changed() => break,
            }
            tokio::select! {
                _ = tokio::time::sleep(delay - floor) => {}
                changed = prices.changed() => {
                    if changed.is_ok() {
                        debug!("Woken early by a price update");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("Detection loop stopped");
    }

    /// One full detection, gating and execution pass.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.lock().cycles = cycle;

        let config = match self.trading.snapshot() {
            Ok(config) => config,
            Err(e) => {
                warn!("Skipping cycle, configuration refused: {}", e);
                return CycleOutcome::Skipped(e.to_string());
            }
        };

        let every = self.settings.health_check_every.max(1);
        if (cycle - 1) % every == 0 || self.health_failed.load(Ordering::SeqCst) {
            let health = self.risk.check_system_health();
            for warning in &health.warnings {
                warn!("🏥 {}", warning);
            }
            if !health.healthy {
                self.health_failed.store(true, Ordering::SeqCst);
                error!(errors = ?health.errors, "🏥 Health check failed, backing off");
                self.alerts.publish(Alert::HealthCheckFailed { errors: health.errors.clone(), at: Utc::now() });
                self.breaker.record_event(BreakerCategory::SystemError, "health check failed").await;
                return CycleOutcome::Unhealthy(health.errors);
            }
            if self.health_failed.swap(false, Ordering::SeqCst) {
                info!("🏥 Health restored");
            }
        }

        if cycle % self.settings.maintenance_every.max(1) == 0 {
            self.maintenance();
        }

        let Some((prices, source)) = self.detector.fetch_prices().await else {
            debug!("No usable prices this cycle");
            self.record_activity(false);
            return CycleOutcome::NoPrices;
        };
        self.record_prices(&prices);

        let max_safe = match self.risk.max_safe_amount(&config) {
            Ok(amount) => amount,
            Err(e) => return self.handle_fault("capacity check", e).await,
        };

        let mut opportunity = match self.detector.evaluate(&prices, source, &config, max_safe) {
            Ok(opportunity) => opportunity,
            Err(reason) => {
                debug!("No opportunity: {}", reason);
                self.record_activity(false);
                return CycleOutcome::NoOpportunity(reason);
            }
        };
        self.record_activity(true);

        let insight = self.analytics.lock().insight();
        if insight.size_factor < 1.0 {
            let factor = Decimal::from_f64(insight.size_factor).unwrap_or(Decimal::ONE);
            let resized = opportunity.resized((opportunity.amount * factor).round_dp(6));
            if resized.net_profit < self.detector.settings().min_net_profit {
                debug!(signal = ?insight.signal, "Opportunity too small after size adjustment");
                return CycleOutcome::NoOpportunity(NoOpportunity::InsufficientProfit {
                    net_profit: resized.net_profit,
                    minimum: self.detector.settings().min_net_profit,
                });
            }
            debug!(signal = ?insight.signal, from = %opportunity.amount, to = %resized.amount, "Size reduced");
            opportunity = resized;
        }

        if let Err(e) = self.store.record_opportunity(&opportunity) {
            return self.handle_fault("record opportunity", e).await;
        }
        self.stats.lock().opportunities += 1;
        display_opportunity(&opportunity, &insight);

        if let Some(state) = self.breaker.blocking_state().await {
            warn!(category = %state.category, "⚡ Circuit breaker active, not executing");
            return CycleOutcome::Halted(state.category);
        }

        match self.risk.assess(&opportunity, &config) {
            Ok(Verdict::Approved) => {}
            Ok(Verdict::Rejected(reason)) => {
                info!("🛑 Risk rejected: {}", reason);
                self.stats.lock().rejected += 1;
                return CycleOutcome::Rejected(reason);
            }
            Err(e) => return self.handle_fault("risk assessment", e).await,
        }

        match self.executor.execute(&opportunity).await {
            Ok(outcome) => {
                display_execution(&outcome);
                let status = outcome.status();
                self.on_outcome(&opportunity.id, outcome).await;
                CycleOutcome::Executed(status)
            }
            Err(e) => self.handle_fault("execution", e).await,
        }
    }

    async fn on_outcome(&self, opportunity_id: &str, outcome: ExecutionOutcome) {
        self.stats.lock().executions += 1;
        match outcome {
            ExecutionOutcome::Completed(result) => {
                {
                    let mut stats = self.stats.lock();
                    stats.completed += 1;
                    stats.cumulative_pnl += result.profit_loss;
                }
                for leg in [&result.sell_trade, &result.buy_trade] {
                    if let Some(done) = leg.completed_at {
                        let secs = (done - leg.created_at).num_milliseconds() as f64 / 1000.0;
                        self.supervisor.record_execution_time(OrderType::Arbitrage, secs.max(0.0));
                    }
                }
                if result.profit_loss < -self.settings.large_loss_threshold {
                    let reason = format!("loss of {} on opportunity {}", result.profit_loss, opportunity_id);
                    self.breaker.record_event(BreakerCategory::LargeLoss, &reason).await;
                }
            }
            ExecutionOutcome::PartialFailure { sell_trade, reason, .. } => {
                self.stats.lock().partial_failures += 1;
                self.alerts.publish(Alert::PartialExecution {
                    opportunity_id: opportunity_id.to_string(),
                    sell_trade_id: sell_trade.id.clone(),
                    unhedged_amount: sell_trade.amount,
                    reason: reason.clone(),
                    at: Utc::now(),
                });
                let reason = format!("sell {} completed without its buy leg: {}", sell_trade.id, reason);
                self.breaker.trip(BreakerCategory::UnhedgedPosition, &reason, 1, 0).await;
            }
            // The supervisor reports these if they end unhedged.
            ExecutionOutcome::SellPending { .. } | ExecutionOutcome::BuyPending { .. } => {}
        }
    }

    async fn handle_fault(&self, stage: &str, e: BotError) -> CycleOutcome {
        match self.recovery.handle_error(&e).await {
            RecoveryAction::Skip { log_level } if log_level == Level::WARN => warn!("{} skipped: {}", stage, e),
            RecoveryAction::Skip { .. } => debug!("{} skipped: {}", stage, e),
            RecoveryAction::Abort => warn!("{} aborted by the ledger: {}", stage, e),
            RecoveryAction::Record { category } => {
                warn!("{} failed: {}", stage, e);
                self.breaker.record_event(category, &e.to_string()).await;
            }
            RecoveryAction::Alert { category } => {
                error!("{} left money at risk: {}", stage, e);
                self.breaker.trip(category, &e.to_string(), 1, 0).await;
            }
            RecoveryAction::Halt => warn!("{} halted: {}", stage, e),
            RecoveryAction::Escalate => {
                error!("{} fault: {}", stage, e);
                self.breaker.record_event(BreakerCategory::SystemError, &e.to_string()).await;
            }
        }
        CycleOutcome::Failed(e.to_string())
    }

    fn record_prices(&self, prices: &PriceMap) {
        for (pair, quote) in prices {
            let sample = PriceSample {
                pair: *pair,
                price: quote.price,
                volume: quote.volume,
                timestamp: quote.timestamp,
            };
            if let Err(e) = self.store.record_price(sample) {
                warn!(%pair, "Failed to record price sample: {}", e);
            }
        }
        self.analytics.lock().add_prices(prices);
    }

    fn record_activity(&self, found: bool) {
        let mut activity = self.activity.lock();
        activity.push_back(found);
        while activity.len() > self.settings.activity_window.max(1) {
            activity.pop_front();
        }
    }

    /// Pacing from the share of recent cycles that found something: busy
    /// markets are polled at the floor, quiet ones at the ceiling.
    pub fn next_interval(&self) -> Duration {
        let (found, seen) = {
            let activity = self.activity.lock();
            (activity.iter().filter(|f| **f).count(), activity.len())
        };
        let base = self.settings.base_interval;
        let interval = if seen < 5 {
            base
        } else {
            let rate = found as f64 / seen as f64;
            if rate >= 0.5 {
                self.settings.min_interval
            } else if rate > 0.2 {
                base / 2
            } else if rate > 0.0 {
                base
            } else {
                self.settings.max_interval
            }
        };
        let interval = interval.clamp(self.settings.min_interval, self.settings.max_interval.max(self.settings.min_interval));
        self.interval_ms.store(interval.as_millis() as u64, Ordering::Relaxed);
        interval
    }

    fn maintenance(&self) {
        info!("🔧 Running maintenance");
        if let Err(e) = self.rebalance() {
            warn!("Rebalancing failed: {}", e);
        }
        self.supervisor.auto_tune();
    }

    /// Moves available stablecoin funds so neither falls below the configured
    /// share of the combined stablecoin holdings.
    fn rebalance(&self) -> BotResult<Option<Rebalance>> {
        let usdt = self.ledger.balance(Currency::Usdt)?;
        let usdc = self.ledger.balance(Currency::Usdc)?;
        let combined = usdt.total + usdc.total;
        if combined <= Decimal::ZERO {
            return Ok(None);
        }

        let (low, high) = if usdt.total <= usdc.total { (usdt, usdc) } else { (usdc, usdt) };
        if low.total >= combined * self.settings.rebalance_min_ratio {
            return Ok(None);
        }

        let target = combined / Decimal::TWO;
        let amount = (target - low.total).min(high.available()).round_dp(6);
        if amount <= Decimal::ZERO {
            debug!("Rebalance needed but no {} is available", high.currency);
            return Ok(None);
        }

        self.ledger.transfer(high.currency, low.currency, amount)?;
        info!(from = %high.currency, to = %low.currency, %amount, "⚖️ Stablecoins rebalanced");
        Ok(Some(Rebalance { from: high.currency, to: low.currency, amount }))
    }

    pub fn force_rebalance(&self) -> BotResult<Option<Rebalance>> {
        self.rebalance()
    }

    pub async fn status(&self) -> BotResult<EngineStatus> {
        let today = self.supervisor.statistics()?;
        let stats = self.session_stats();
        Ok(EngineStatus {
            running: self.is_running(),
            cycles: stats.cycles,
            current_interval_ms: self.interval_ms.load(Ordering::Relaxed),
            pending_orders: today.pending,
            today,
            health: self.risk.check_system_health(),
            breakers: self.breaker.states().await,
            balances: self.ledger.snapshot(),
            cumulative_pnl: stats.cumulative_pnl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedTradingConfig;
    use crate::exchange::PaperExchange;
    use crate::storage::MemoryStore;
    use rust_decimal_macros::dec;

    fn engine(usdt: Decimal, usdc: Decimal) -> EngineLoop {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let ledger = Arc::new(
            BalanceLedger::with_balances(
                store.clone(),
                &[(Currency::Xrp, dec!(1000)), (Currency::Usdt, usdt), (Currency::Usdc, usdc)],
            )
            .unwrap(),
        );
        let cache = Arc::new(PriceCache::new());
        EngineLoop::new(
            &Config::default(),
            Arc::new(SharedTradingConfig::default()),
            store,
            ledger,
            Arc::new(PaperExchange::new()),
            PriceSources::new(cache, None, 10),
            AlertBus::default(),
        )
    }

    #[test]
    fn rebalance_tops_up_the_low_stablecoin() {
        let engine = engine(dec!(900), dec!(100));
        let moved = engine.force_rebalance().unwrap().unwrap();
        assert_eq!(moved, Rebalance { from: Currency::Usdt, to: Currency::Usdc, amount: dec!(400) });
        assert_eq!(engine.ledger.balance(Currency::Usdc).unwrap().total, dec!(500));
        assert_eq!(engine.ledger.balance(Currency::Usdt).unwrap().total, dec!(500));
    }

    #[test]
    fn rebalance_leaves_balanced_books_alone() {
        let engine = engine(dec!(600), dec!(400));
        assert_eq!(engine.force_rebalance().unwrap(), None);
    }

    #[test]
    fn rebalance_only_moves_available_funds() {
        let engine = engine(dec!(900), dec!(100));
        engine.ledger.lock(Currency::Usdt, dec!(800)).unwrap();
        let moved = engine.force_rebalance().unwrap().unwrap();
        assert_eq!(moved.amount, dec!(100));
        assert_eq!(engine.ledger.balance(Currency::Usdt).unwrap().locked, dec!(800));
    }

    #[test]
    fn interval_follows_activity() {
        let engine = engine(dec!(500), dec!(500));
        assert_eq!(engine.next_interval(), Duration::from_secs(5));

        for _ in 0..20 {
            engine.record_activity(false);
        }
        assert_eq!(engine.next_interval(), Duration::from_secs(10));

        for _ in 0..20 {
            engine.record_activity(true);
        }
        assert_eq!(engine.next_interval(), Duration::from_secs(1));
        assert_eq!(engine.activity.lock().len(), 20);
    }

    #[tokio::test]
    async fn cycle_without_prices_finds_nothing() {
        let engine = engine(dec!(500), dec!(500));
        assert_eq!(engine.run_cycle().await, CycleOutcome::NoPrices);
        assert_eq!(engine.session_stats().cycles, 1);
    }
}
