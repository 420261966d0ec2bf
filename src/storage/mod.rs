//! Persistence interface, in-memory store and JSON-lines journals

pub mod opportunities;
pub mod executions;
pub mod memory;

pub use opportunities::*;
pub use executions::*;
pub use memory::*;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use crate::{
    errors::BotResult,
    types::{Balance, ExecutionRecord, Opportunity, OpportunityRecord, Pair, PriceSample, Trade, TradeStatus},
};

/// Logical operations the core needs from persistence. Opportunity and trade
/// records are append-only; a trade leaves `pending` exactly once.
pub trait Store: Send + Sync {
    fn ping(&self) -> BotResult<()>;

    fn save_balance(&self, balance: &Balance) -> BotResult<()>;
    fn load_balances(&self) -> BotResult<Vec<Balance>>;

    fn record_opportunity(&self, opportunity: &Opportunity) -> BotResult<()>;
    /// Returns false when the opportunity is unknown or already executed.
    fn mark_opportunity_executed(&self, opportunity_id: &str) -> BotResult<bool>;
    fn opportunity(&self, opportunity_id: &str) -> BotResult<Option<OpportunityRecord>>;

    fn insert_trade(&self, trade: &Trade) -> BotResult<()>;
    /// Updates a trade that is still pending (order id, realized price).
    fn update_pending_trade(&self, trade: &Trade) -> BotResult<()>;
    /// Moves a pending trade to its terminal state. Returns false if another
    /// writer already finalized it, in which case nothing is changed.
    fn finalize_trade(&self, trade: &Trade) -> BotResult<bool>;
    /// Reporting-only profit annotation, allowed after completion.
    fn attach_profit(&self, trade_id: &str, profit_loss: Decimal) -> BotResult<()>;
    fn trade(&self, trade_id: &str) -> BotResult<Option<Trade>>;
    fn pending_trades(&self) -> BotResult<Vec<Trade>>;
    fn trades_since(&self, since: DateTime<Utc>) -> BotResult<Vec<Trade>>;
    /// Both legs of an arbitrage, in insertion order.
    fn opportunity_trades(&self, opportunity_id: &str) -> BotResult<Vec<Trade>>;

    fn record_price(&self, sample: PriceSample) -> BotResult<()>;
    /// Newest first, at most `limit` samples at or after `since`.
    fn recent_prices(&self, pair: Pair, since: DateTime<Utc>, limit: usize) -> BotResult<Vec<PriceSample>>;

    fn record_execution(&self, record: &ExecutionRecord) -> BotResult<()>;

    fn todays_trades(&self) -> BotResult<Vec<Trade>> {
        self.trades_since(today_start())
    }

    /// Sum of today's completed and pending trade amounts
    fn todays_volume(&self) -> BotResult<Decimal> {
        Ok(self
            .todays_trades()?
            .iter()
            .filter(|t| matches!(t.status, TradeStatus::Completed | TradeStatus::Pending))
            .map(|t| t.amount)
            .sum())
    }
}

pub fn today_start() -> DateTime<Utc> {
    let now = Utc::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}
