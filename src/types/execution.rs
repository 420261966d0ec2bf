//! Trade execution types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use super::Trade;

/// Journal entry written once per executed opportunity
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub opportunity_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub sell_trade_id: String,
    pub buy_trade_id: Option<String>,
    pub amount: Decimal,
    pub expected_profit: Decimal,
    pub profit_loss: Option<Decimal>,
    pub execution_time_ms: u64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    SellPending,
    BuyPending,
    PartialFailure,
}

/// Both legs settled
#[derive(Debug, Clone, Serialize)]
pub struct ArbitrageResult {
    pub sell_trade: Trade,
    pub buy_trade: Trade,
    pub profit_loss: Decimal,
}

/// What `OrderExecutor::execute` hands back to the engine.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Completed(ArbitrageResult),
    /// Sell leg still open after the bounded wait; the supervisor owns it now.
    SellPending { sell_trade: Trade },
    /// Sell completed, buy leg still open and handed to the supervisor.
    BuyPending { sell_trade: Trade, buy_trade: Trade },
    /// Sell completed but the buy leg failed. The position is unhedged.
    PartialFailure {
        sell_trade: Trade,
        buy_trade: Option<Trade>,
        reason: String,
    },
}

impl ExecutionOutcome {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionOutcome::Completed(_) => ExecutionStatus::Completed,
            ExecutionOutcome::SellPending { .. } => ExecutionStatus::SellPending,
            ExecutionOutcome::BuyPending { .. } => ExecutionStatus::BuyPending,
            ExecutionOutcome::PartialFailure { .. } => ExecutionStatus::PartialFailure,
        }
    }

    pub fn sell_trade(&self) -> &Trade {
        match self {
            ExecutionOutcome::Completed(result) => &result.sell_trade,
            ExecutionOutcome::SellPending { sell_trade }
            | ExecutionOutcome::BuyPending { sell_trade, .. }
            | ExecutionOutcome::PartialFailure { sell_trade, .. } => sell_trade,
        }
    }

    pub fn buy_trade(&self) -> Option<&Trade> {
        match self {
            ExecutionOutcome::Completed(result) => Some(&result.buy_trade),
            ExecutionOutcome::SellPending { .. } => None,
            ExecutionOutcome::BuyPending { buy_trade, .. } => Some(buy_trade),
            ExecutionOutcome::PartialFailure { buy_trade, .. } => buy_trade.as_ref(),
        }
    }

    pub fn profit_loss(&self) -> Option<Decimal> {
        match self {
            ExecutionOutcome::Completed(result) => Some(result.profit_loss),
            _ => None,
        }
    }

    pub fn is_partial_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::PartialFailure { .. })
    }
}
