//! Background resolution of pending orders

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use crate::{
    config::SupervisorSettings,
    errors::{Alert, AlertBus, BotError, BotResult, BreakerCategory, CircuitBreaker},
    exchange::{BoundedExchange, ExchangeConnector, OrderState},
    ledger::BalanceLedger,
    storage::Store,
    types::{OrderType, Trade, TradeSide, TradeStatus},
};

/// What one sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub completed: usize,
    pub timed_out: usize,
    pub extended: usize,
    /// Orders whose check failed; they stay pending for the next sweep
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStats {
    pub total_today: usize,
    pub completed_today: usize,
    pub timeouts_today: usize,
    pub pending: usize,
    pub timeout_counters: HashMap<OrderType, u32>,
    pub timeouts_secs: HashMap<OrderType, u64>,
    pub min_execution_secs: Option<f64>,
    pub avg_execution_secs: Option<f64>,
    pub max_execution_secs: Option<f64>,
    pub success_rate_pct: f64,
    pub timeout_rate_pct: f64,
}

pub struct OrderSupervisor {
    settings: SupervisorSettings,
    ledger: Arc<BalanceLedger>,
    store: Arc<dyn Store>,
    exchange: BoundedExchange,
    breaker: Arc<CircuitBreaker>,
    alerts: AlertBus,
    timeouts: RwLock<HashMap<OrderType, u64>>,
    timeout_counts: Mutex<HashMap<OrderType, u32>>,
    execution_times: Mutex<HashMap<OrderType, VecDeque<f64>>>,
}

impl OrderSupervisor {
    pub fn new(
        settings: SupervisorSettings,
        ledger: Arc<BalanceLedger>,
        store: Arc<dyn Store>,
        exchange: Arc<dyn ExchangeConnector>,
        call_timeout: std::time::Duration,
        breaker: Arc<CircuitBreaker>,
        alerts: AlertBus,
    ) -> Self {
        let timeouts = OrderType::ALL.iter().map(|t| (*t, settings.timeout_for(*t))).collect();
        Self {
            exchange: BoundedExchange::new(exchange, call_timeout),
            timeouts: RwLock::new(timeouts),
            timeout_counts: Mutex::new(HashMap::new()),
            execution_times: Mutex::new(HashMap::new()),
            settings,
            ledger,
            store,
            breaker,
            alerts,
        }
    }

    pub fn timeout_secs(&self, order_type: OrderType) -> u64 {
        self.timeouts
            .read()
            .get(&order_type)
            .copied()
            .unwrap_or_else(|| self.settings.timeout_for(order_type))
    }

    pub fn timeout_count(&self, order_type: OrderType) -> u32 {
        self.timeout_counts.lock().get(&order_type).copied().unwrap_or(0)
    }

    /// Operator action after investigating an `order_timeout` activation.
    pub fn reset_timeout_counter(&self, order_type: OrderType) {
        self.timeout_counts.lock().remove(&order_type);
    }

    pub fn record_execution_time(&self, order_type: OrderType, secs: f64) {
        let mut times = self.execution_times.lock();
        let samples = times.entry(order_type).or_default();
        samples.push_back(secs);
        while samples.len() > self.settings.execution_sample_size {
            samples.pop_front();
        }
    }

    /// Ticks every `settings.interval` until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("🛡️ Order supervisor started (every {:?})", self.settings.interval);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(report) if report.checked > 0 => debug!(?report, "Supervisor sweep"),
                        Ok(_) => {}
                        Err(e) => {
                            warn!("Supervisor sweep failed: {}", e);
                            self.breaker.record_event(BreakerCategory::SystemError, "supervisor sweep failed").await;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("🛡️ Order supervisor stopped");
    }

    /// Checks every pending trade once. A failing check is counted as a
    /// system error and the sweep moves on to the next trade.
    pub async fn sweep(&self) -> BotResult<SweepReport> {
        let mut report = SweepReport::default();
        for trade in self.store.pending_trades()? {
            report.checked += 1;
            let trade_id = trade.id.clone();
            if let Err(e) = self.check(trade, &mut report).await {
                report.failed += 1;
                warn!(trade_id = %trade_id, "Pending order check failed: {}", e);
                let reason = format!("pending order {trade_id} could not be resolved");
                self.breaker.record_event(BreakerCategory::SystemError, &reason).await;
            }
        }
        Ok(report)
    }

    async fn check(&self, trade: Trade, report: &mut SweepReport) -> BotResult<()> {
        let age = trade.age_secs(Utc::now());
        let timeout = self.timeout_secs(trade.order_type) as f64;

        let Some(order_id) = trade.order_id.clone() else {
            if age > timeout {
                self.resolve_unfilled(trade, TradeStatus::TimeoutError, "order was never acknowledged").await?;
                report.timed_out += 1;
            }
            return Ok(());
        };

        let status = self.exchange.get_order_status(&order_id, trade.pair).await;
        if age <= timeout {
            if let Ok(OrderState::Closed) = status {
                if self.complete(trade).await? {
                    report.completed += 1;
                }
            }
            return Ok(());
        }

        match status {
            Ok(OrderState::Closed) => {
                if self.complete(trade).await? {
                    report.completed += 1;
                }
            }
            Ok(OrderState::Partial) if age <= timeout * 2.0 => {
                debug!(trade_id = %trade.id, age, "Partially filled, extending observation");
                report.extended += 1;
            }
            Ok(_) => {
                let status = match self.exchange.cancel_order(&order_id, trade.pair).await {
                    Ok(true) => TradeStatus::TimeoutCancelled,
                    Ok(false) => TradeStatus::TimeoutFailed,
                    Err(e) => {
                        warn!(trade_id = %trade.id, "Cancel failed: {}", e);
                        TradeStatus::TimeoutError
                    }
                };
                let reason = format!("timed out after {:.1}s ({}s limit)", age, timeout);
                self.resolve_unfilled(trade, status, &reason).await?;
                report.timed_out += 1;
            }
            Err(e) => {
                self.resolve_unfilled(trade, TradeStatus::TimeoutError, &e.to_string()).await?;
                report.timed_out += 1;
            }
        }
        Ok(())
    }

    /// Settles a filled order. Returns false when another writer resolved it
    /// first. The store only records the completion if the ledger settled it.
    async fn complete(&self, mut trade: Trade) -> BotResult<bool> {
        let now = Utc::now();
        trade.status = TradeStatus::Completed;
        trade.completed_at = Some(now);
        let (debit, credit) = trade.settlement();
        match self.ledger.settle_claimed(debit, credit, || self.store.finalize_trade(&trade)) {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(e) if e.is_ledger_violation() => {
                self.reject_fill(trade, &e).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        }
        self.record_execution_time(trade.order_type, trade.age_secs(now));
        info!(trade_id = %trade.id, side = %trade.side, "✅ Pending order completed");
        self.check_hedge(&trade).await;
        Ok(true)
    }

    /// The exchange filled an order the ledger cannot absorb: the trade fails,
    /// its reservation is released and the operator is told.
    async fn reject_fill(&self, mut trade: Trade, cause: &BotError) -> BotResult<()> {
        let reason = format!("fill could not be settled: {cause}");
        trade.status = TradeStatus::Failed;
        trade.completed_at = Some(Utc::now());
        trade.error_message = Some(reason.clone());
        if !self.store.finalize_trade(&trade)? {
            return Ok(());
        }
        if let Err(e) = self.ledger.unlock(trade.reserved_currency, trade.reserved_amount) {
            error!(trade_id = %trade.id, "Failed to release reservation: {}", e);
        }
        self.alerts.publish(Alert::SettlementRejected {
            trade_id: trade.id.clone(),
            reason,
            at: Utc::now(),
        });
        self.check_hedge(&trade).await;
        Ok(())
    }

    /// Terminal non-fill: the reservation is released whatever the status.
    async fn resolve_unfilled(&self, mut trade: Trade, status: TradeStatus, reason: &str) -> BotResult<()> {
        trade.status = status;
        trade.completed_at = Some(Utc::now());
        trade.error_message = Some(reason.to_string());
        if !self.store.finalize_trade(&trade)? {
            return Ok(());
        }
        if let Err(e) = self.ledger.unlock(trade.reserved_currency, trade.reserved_amount) {
            error!(trade_id = %trade.id, "Failed to release reservation: {}", e);
        }
        warn!(trade_id = %trade.id, order_type = %trade.order_type, ?status, "⏰ Order {}", reason);

        if status.is_timeout() {
            let count = {
                let mut counts = self.timeout_counts.lock();
                let count = counts.entry(trade.order_type).or_insert(0);
                *count += 1;
                *count
            };
            let max = self.settings.max_timeouts_per_type;
            if count > max {
                let reason = format!("{} {} orders timed out", count, trade.order_type);
                self.breaker.trip(BreakerCategory::OrderTimeout, &reason, count, max).await;
            }
        }
        self.check_hedge(&trade).await;
        Ok(())
    }

    /// Called once a leg of an arbitrage resolved outside the executor. A
    /// completed sell with no buy behind it is an unhedged position.
    async fn check_hedge(&self, trade: &Trade) {
        let Some(opportunity_id) = trade.opportunity_id.as_deref() else {
            return;
        };
        let legs = match self.store.opportunity_trades(opportunity_id) {
            Ok(legs) => legs,
            Err(e) => {
                warn!(opportunity_id = %opportunity_id, "Could not load arbitrage legs: {}", e);
                return;
            }
        };
        let Some(sell) = legs
            .iter()
            .find(|t| t.side == TradeSide::Sell && t.status == TradeStatus::Completed)
        else {
            return;
        };

        match trade.side {
            TradeSide::Sell => {
                if legs.iter().any(|t| t.side == TradeSide::Buy) {
                    return;
                }
                if let Err(e) = self.store.mark_opportunity_executed(opportunity_id) {
                    warn!(opportunity_id = %opportunity_id, "Failed to mark opportunity executed: {}", e);
                }
                self.report_unhedged(opportunity_id, sell, "sell filled after the executor let go of it; no buy leg was placed")
                    .await;
            }
            TradeSide::Buy if trade.status == TradeStatus::Completed => {
                let profit_loss = sell.total_value - trade.total_value;
                let per_leg = profit_loss / Decimal::TWO;
                for id in [&sell.id, &trade.id] {
                    if let Err(e) = self.store.attach_profit(id, per_leg) {
                        warn!(trade_id = %id, "Failed to attach profit: {}", e);
                    }
                }
                info!(opportunity_id = %opportunity_id, "✅ Arbitrage completed by the supervisor | P&L {:.6}", profit_loss);
            }
            TradeSide::Buy => {
                let reason = format!("buy leg {} ended {:?}", trade.id, trade.status);
                self.report_unhedged(opportunity_id, sell, &reason).await;
            }
        }
    }

    async fn report_unhedged(&self, opportunity_id: &str, sell: &Trade, reason: &str) {
        self.alerts.publish(Alert::PartialExecution {
            opportunity_id: opportunity_id.to_string(),
            sell_trade_id: sell.id.clone(),
            unhedged_amount: sell.amount,
            reason: reason.to_string(),
            at: Utc::now(),
        });
        let reason = format!("sell {} completed without its buy leg: {}", sell.id, reason);
        self.breaker.trip(BreakerCategory::UnhedgedPosition, &reason, 1, 0).await;
    }

    /// Resolves every pending order at shutdown, unlocking reservations whether
    /// or not the exchange confirms the cancel.
    pub async fn force_cancel_all(&self) -> BotResult<usize> {
        let pending = self.store.pending_trades()?;
        let count = pending.len();
        for trade in pending {
            let trade_id = trade.id.clone();
            if let Err(e) = self.cancel_at_shutdown(trade).await {
                error!(trade_id = %trade_id, "Order could not be resolved at shutdown: {}", e);
            }
        }
        Ok(count)
    }

    async fn cancel_at_shutdown(&self, mut trade: Trade) -> BotResult<()> {
        if let Some(order_id) = trade.order_id.clone() {
            if let Ok(OrderState::Closed) = self.exchange.get_order_status(&order_id, trade.pair).await {
                self.complete(trade).await?;
                return Ok(());
            }
            trade.status = match self.exchange.cancel_order(&order_id, trade.pair).await {
                Ok(true) => TradeStatus::Cancelled,
                Ok(false) => TradeStatus::CancelFailed,
                Err(e) => {
                    warn!(trade_id = %trade.id, "Cancel at shutdown failed: {}", e);
                    TradeStatus::CancelFailed
                }
            };
        } else {
            trade.status = TradeStatus::Cancelled;
        }
        trade.completed_at = Some(Utc::now());
        trade.error_message = Some("cancelled at shutdown".into());
        if self.store.finalize_trade(&trade)? {
            if let Err(e) = self.ledger.unlock(trade.reserved_currency, trade.reserved_amount) {
                error!(trade_id = %trade.id, "Failed to release reservation: {}", e);
            }
            info!(trade_id = %trade.id, status = ?trade.status, "Order resolved at shutdown");
            self.check_hedge(&trade).await;
        }
        Ok(())
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let rank = (p * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }

    /// Re-derives per-type timeouts from observed execution times. Types with
    /// fewer than ten samples keep their current timeout.
    pub fn auto_tune(&self) -> HashMap<OrderType, u64> {
        let times = self.execution_times.lock().clone();
        let mut timeouts = self.timeouts.write();
        for order_type in OrderType::ALL {
            let Some(samples) = times.get(&order_type).filter(|s| s.len() >= 10) else {
                continue;
            };
            let mut sorted: Vec<f64> = samples.iter().copied().collect();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let tuned = match order_type {
                OrderType::Market => (Self::percentile(&sorted, 0.95) * 1.5).max(10.0),
                OrderType::Limit => (Self::percentile(&sorted, 0.99) * 1.2).max(15.0),
                OrderType::Arbitrage => (Self::percentile(&sorted, 0.99) * 1.3).max(20.0),
            };
            let tuned = tuned.ceil() as u64;
            if timeouts.insert(order_type, tuned) != Some(tuned) {
                info!(%order_type, timeout_secs = tuned, "🔧 Order timeout tuned");
            }
        }
        timeouts.clone()
    }

    pub fn statistics(&self) -> BotResult<SupervisorStats> {
        let today = self.store.todays_trades()?;
        let total_today = today.len();
        let completed_today = today.iter().filter(|t| t.status == TradeStatus::Completed).count();
        let timeouts_today = today.iter().filter(|t| t.status.is_timeout()).count();
        let pending = self.store.pending_trades()?.len();

        let samples: Vec<f64> = self.execution_times.lock().values().flatten().copied().collect();
        let (min, avg, max) = if samples.is_empty() {
            (None, None, None)
        } else {
            let sum: f64 = samples.iter().sum();
            (
                samples.iter().copied().reduce(f64::min),
                Some(sum / samples.len() as f64),
                samples.iter().copied().reduce(f64::max),
            )
        };
        let rate = |n: usize| if total_today == 0 { 0.0 } else { n as f64 / total_today as f64 * 100.0 };

        Ok(SupervisorStats {
            total_today,
            completed_today,
            timeouts_today,
            pending,
            timeout_counters: self.timeout_counts.lock().clone(),
            timeouts_secs: self.timeouts.read().clone(),
            min_execution_secs: min,
            avg_execution_secs: avg,
            max_execution_secs: max,
            success_rate_pct: rate(completed_today),
            timeout_rate_pct: rate(timeouts_today),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_uses_nearest_rank() {
        let sorted: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert_eq!(OrderSupervisor::percentile(&sorted, 0.95), 95.0);
        assert_eq!(OrderSupervisor::percentile(&sorted, 0.99), 99.0);
        assert_eq!(OrderSupervisor::percentile(&[3.0], 0.5), 3.0);
        assert_eq!(OrderSupervisor::percentile(&[], 0.5), 0.0);
    }
}
