//! Two-leg arbitrage execution: sell first, then buy

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::prelude::*;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};
use crate::{
    config::ExecutionSettings,
    errors::{BotError, BotResult},
    exchange::{BoundedExchange, ExchangeConnector, OrderState},
    ledger::{BalanceLedger, Reservation},
    storage::Store,
    types::{
        ArbitrageResult, ExecutionOutcome, ExecutionRecord, Opportunity, OrderType, Trade, TradeSide,
        TradeStatus,
    },
};

/// How many opportunity ids the executor remembers on its own. Older ids
/// rely on the store's `executed` flag.
const RECENT_CLAIMS: usize = 1024;

/// Opportunity ids claimed this session, oldest evicted first
#[derive(Default)]
struct RecentClaims {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl RecentClaims {
    fn insert(&mut self, id: &str) -> bool {
        if !self.ids.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > RECENT_CLAIMS {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

enum LegResult {
    Completed,
    /// Still open after the bounded wait; the supervisor owns it now
    Pending,
    SubmitFailed(BotError),
}

pub struct OrderExecutor {
    settings: ExecutionSettings,
    ledger: Arc<BalanceLedger>,
    store: Arc<dyn Store>,
    exchange: BoundedExchange,
    /// One arbitrage in flight at a time
    gate: AsyncMutex<()>,
    attempted: Mutex<RecentClaims>,
}

impl OrderExecutor {
    pub fn new(
        settings: ExecutionSettings,
        ledger: Arc<BalanceLedger>,
        store: Arc<dyn Store>,
        exchange: Arc<dyn ExchangeConnector>,
    ) -> Self {
        let exchange = BoundedExchange::new(exchange, settings.call_timeout);
        Self {
            settings,
            ledger,
            store,
            exchange,
            gate: AsyncMutex::new(()),
            attempted: Mutex::new(RecentClaims::default()),
        }
    }

    fn claim(&self, opportunity_id: &str) -> BotResult<()> {
        let already_executed = self
            .store
            .opportunity(opportunity_id)?
            .map(|record| record.executed)
            .unwrap_or(false);
        if already_executed || !self.attempted.lock().insert(opportunity_id) {
            return Err(BotError::DuplicateExecution { opportunity_id: opportunity_id.to_string() });
        }
        Ok(())
    }

    /// Executes the sell leg, and only once it has completed, the buy leg.
    ///
    /// Errors mean nothing is left at risk: the opportunity was refused or the
    /// sell leg never went through. A failed buy after a completed sell is
    /// reported as [`ExecutionOutcome::PartialFailure`].
    pub async fn execute(&self, opportunity: &Opportunity) -> BotResult<ExecutionOutcome> {
        let _in_flight = self.gate.lock().await;
        self.claim(&opportunity.id)?;
        let started = Instant::now();

        info!(
            "🚀 Executing {} | {} XRP | spread {:.4}% | expected net {:.4}",
            opportunity.direction, opportunity.amount, opportunity.spread_pct, opportunity.net_profit
        );

        let mut sell = self.new_leg(opportunity, TradeSide::Sell);
        let reservation = self.ledger.reserve(sell.reserved_currency, sell.reserved_amount)?;
        match self.run_leg(&mut sell, reservation).await? {
            LegResult::Completed => {}
            LegResult::Pending => {
                info!(trade_id = %sell.id, "⏳ Sell leg still open, handed to supervisor");
                let outcome = ExecutionOutcome::SellPending { sell_trade: sell };
                self.journal(opportunity, &outcome, started, None);
                return Ok(outcome);
            }
            LegResult::SubmitFailed(e) => {
                warn!(trade_id = %sell.id, "❌ Sell leg rejected: {}", e);
                return Err(e);
            }
        }

        if let Err(e) = self.store.mark_opportunity_executed(&opportunity.id) {
            warn!(opportunity_id = %opportunity.id, "Failed to mark opportunity executed: {}", e);
        }

        let mut buy = self.new_leg(opportunity, TradeSide::Buy);
        let reservation = match self.ledger.reserve(buy.reserved_currency, buy.reserved_amount) {
            Ok(reservation) => reservation,
            Err(e) => return Ok(self.partial_failure(opportunity, sell, None, e, started)),
        };
        let leg = match self.run_leg(&mut buy, reservation).await {
            Ok(leg) => leg,
            Err(e) => return Ok(self.partial_failure(opportunity, sell, Some(buy), e, started)),
        };

        let outcome = match leg {
            LegResult::Completed => {
                let profit_loss = sell.total_value - buy.total_value;
                let per_leg = profit_loss / Decimal::TWO;
                for trade in [&mut sell, &mut buy] {
                    trade.profit_loss = Some(per_leg);
                    if let Err(e) = self.store.attach_profit(&trade.id, per_leg) {
                        warn!(trade_id = %trade.id, "Failed to attach profit: {}", e);
                    }
                }
                info!(
                    "✅ Arbitrage complete in {}ms | P&L {:.6} {}",
                    started.elapsed().as_millis(),
                    profit_loss,
                    opportunity.sell_pair().quote
                );
                ExecutionOutcome::Completed(ArbitrageResult { sell_trade: sell, buy_trade: buy, profit_loss })
            }
            LegResult::Pending => {
                info!(trade_id = %buy.id, "⏳ Buy leg still open, handed to supervisor");
                ExecutionOutcome::BuyPending { sell_trade: sell, buy_trade: buy }
            }
            LegResult::SubmitFailed(e) => return Ok(self.partial_failure(opportunity, sell, Some(buy), e, started)),
        };
        self.journal(opportunity, &outcome, started, None);
        Ok(outcome)
    }

    fn new_leg(&self, opportunity: &Opportunity, side: TradeSide) -> Trade {
        let (pair, price) = match side {
            TradeSide::Sell => (opportunity.sell_pair(), opportunity.sell_price),
            TradeSide::Buy => (opportunity.buy_pair(), opportunity.buy_price),
        };
        let mut trade = Trade::pending(side, pair, OrderType::Arbitrage, opportunity.amount, price);
        trade.opportunity_id = Some(opportunity.id.clone());
        trade.spread = Some(opportunity.spread_pct);
        trade
    }

    /// Persists, submits and awaits one leg. `Err` is a fault after which the
    /// reservation has been either released or handed to the supervisor.
    async fn run_leg(&self, trade: &mut Trade, reservation: Reservation) -> BotResult<LegResult> {
        self.store.insert_trade(trade)?;

        let ack = match self.exchange.create_order(trade.pair, trade.side, trade.amount).await {
            Ok(ack) => ack,
            Err(e) => {
                self.fail_trade(trade, TradeStatus::Failed, &e.to_string());
                if let Err(unlock) = reservation.release() {
                    error!(trade_id = %trade.id, "Failed to release reservation: {}", unlock);
                }
                return Ok(LegResult::SubmitFailed(e));
            }
        };

        trade.acknowledge(ack.id, ack.price);
        if let Err(e) = self.store.update_pending_trade(trade) {
            // The order is live; the stored pending row lets the supervisor resolve it.
            let _ = reservation.hand_off();
            return Err(e);
        }

        if self.await_fill(trade).await {
            self.complete_leg(trade, reservation)?;
            Ok(LegResult::Completed)
        } else {
            let _ = reservation.hand_off();
            Ok(LegResult::Pending)
        }
    }

    /// Polls until the order closes or the leg wait runs out.
    async fn await_fill(&self, trade: &Trade) -> bool {
        let Some(order_id) = trade.order_id.as_deref() else {
            return false;
        };
        let deadline = tokio::time::Instant::now() + self.settings.leg_wait;
        loop {
            match self.exchange.get_order_status(order_id, trade.pair).await {
                Ok(OrderState::Closed) => return true,
                Ok(_) => {}
                Err(e) => warn!(trade_id = %trade.id, "Status poll failed: {}", e),
            }
            if tokio::time::Instant::now() + self.settings.status_poll_interval > deadline {
                return false;
            }
            tokio::time::sleep(self.settings.status_poll_interval).await;
        }
    }

    /// Settles a filled leg. A fill the ledger cannot absorb fails the leg
    /// instead, so a `Completed` row always has its settlement behind it.
    fn complete_leg(&self, trade: &mut Trade, mut reservation: Reservation) -> BotResult<()> {
        let mut completed = trade.clone();
        completed.status = TradeStatus::Completed;
        completed.completed_at = Some(Utc::now());
        let (debit, credit) = completed.settlement();

        match reservation.commit(debit, credit, || self.store.finalize_trade(&completed)) {
            Ok(true) => {
                *trade = completed;
                Ok(())
            }
            Ok(false) => {
                let status = self
                    .store
                    .trade(&trade.id)?
                    .map(|t| t.status)
                    .unwrap_or(TradeStatus::Pending);
                Err(BotError::TradeNotPending { trade_id: trade.id.clone(), status })
            }
            Err(e) if e.is_ledger_violation() => {
                error!(trade_id = %trade.id, "💥 Filled order could not be settled: {}", e);
                if self.fail_trade(trade, TradeStatus::Failed, &format!("fill could not be settled: {e}")) {
                    if let Err(unlock) = reservation.release() {
                        error!(trade_id = %trade.id, "Failed to release reservation: {}", unlock);
                    }
                } else {
                    let _ = reservation.hand_off();
                }
                Err(e)
            }
            Err(e) => {
                // Still pending in the store; the supervisor picks it up.
                let _ = reservation.hand_off();
                Err(e)
            }
        }
    }

    /// Returns true if this call moved the trade out of `pending`.
    fn fail_trade(&self, trade: &mut Trade, status: TradeStatus, reason: &str) -> bool {
        trade.status = status;
        trade.completed_at = Some(Utc::now());
        trade.error_message = Some(reason.to_string());
        match self.store.finalize_trade(trade) {
            Ok(finalized) => finalized,
            Err(e) => {
                error!(trade_id = %trade.id, "Failed to record {:?} trade: {}", status, e);
                false
            }
        }
    }

    fn partial_failure(
        &self,
        opportunity: &Opportunity,
        sell_trade: Trade,
        buy_trade: Option<Trade>,
        cause: BotError,
        started: Instant,
    ) -> ExecutionOutcome {
        let reason = cause.to_string();
        error!(
            opportunity_id = %opportunity.id,
            sell_trade_id = %sell_trade.id,
            "🚨 Sell completed but buy leg failed: {}", reason
        );
        let outcome = ExecutionOutcome::PartialFailure { sell_trade, buy_trade, reason: reason.clone() };
        self.journal(opportunity, &outcome, started, Some(reason));
        outcome
    }

    fn journal(&self, opportunity: &Opportunity, outcome: &ExecutionOutcome, started: Instant, error_message: Option<String>) {
        if !self.settings.journal_executions {
            return;
        }
        let record = ExecutionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            opportunity_id: opportunity.id.clone(),
            timestamp: Utc::now(),
            status: outcome.status(),
            sell_trade_id: outcome.sell_trade().id.clone(),
            buy_trade_id: outcome.buy_trade().map(|t| t.id.clone()),
            amount: opportunity.amount,
            expected_profit: opportunity.net_profit,
            profit_loss: outcome.profit_loss(),
            execution_time_ms: started.elapsed().as_millis() as u64,
            error_message,
        };
        if let Err(e) = self.store.record_execution(&record) {
            warn!(opportunity_id = %opportunity.id, "Failed to journal execution: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_claims_forget_the_oldest_ids() {
        let mut claims = RecentClaims::default();
        assert!(claims.insert("first"));
        assert!(!claims.insert("first"));

        for i in 0..RECENT_CLAIMS {
            assert!(claims.insert(&format!("opp-{i}")));
        }
        assert_eq!(claims.ids.len(), RECENT_CLAIMS);
        assert_eq!(claims.order.len(), RECENT_CLAIMS);
        assert!(claims.insert("first"));
    }
}
