//! Custom error types for the bot

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;
use crate::types::{Currency, TradeStatus};

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Validation failed: {reason}")]
    Validation {
        reason: String,
    },

    #[error("Insufficient {currency} funds: available {available} < requested {requested}")]
    InsufficientFunds {
        currency: Currency,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Cannot unlock {requested} {currency}: only {locked} locked")]
    OverUnlock {
        currency: Currency,
        locked: Decimal,
        requested: Decimal,
    },

    #[error("{currency} balance would become invalid: total {total}, locked {locked}, change {delta}")]
    NegativeBalance {
        currency: Currency,
        total: Decimal,
        locked: Decimal,
        delta: Decimal,
    },

    #[error("No ledger row for {0}")]
    UnknownCurrency(Currency),

    #[error("Exchange {operation} failed: {message}")]
    Exchange {
        operation: String,
        message: String,
    },

    #[error("Exchange {operation} timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
        retry_count: u32,
    },

    #[error("Partial execution: sell {sell_trade_id} completed but buy leg failed - {reason}")]
    PartialExecution {
        sell_trade_id: String,
        reason: String,
    },

    #[error("Circuit breaker active for {category}: {reason}")]
    CircuitBreakerOpen {
        category: String,
        reason: String,
    },

    #[error("Opportunity {opportunity_id} was already executed")]
    DuplicateExecution {
        opportunity_id: String,
    },

    #[error("Trade {trade_id} is {status:?}, not pending")]
    TradeNotPending {
        trade_id: String,
        status: TradeStatus,
    },

    #[error("Trade {0} not found")]
    TradeNotFound(String),

    #[error("Persistence error: {context}")]
    Persistence {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl BotError {
    pub fn exchange(operation: &str, message: impl ToString) -> Self {
        BotError::Exchange { operation: operation.to_string(), message: message.to_string() }
    }

    pub fn persistence(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        BotError::Persistence { context: context.into(), source: source.into() }
    }

    /// Ledger invariant violations. The operation is aborted and state is untouched.
    pub fn is_ledger_violation(&self) -> bool {
        matches!(
            self,
            BotError::InsufficientFunds { .. }
                | BotError::OverUnlock { .. }
                | BotError::NegativeBalance { .. }
                | BotError::UnknownCurrency(_)
        )
    }

    pub fn is_exchange_failure(&self) -> bool {
        matches!(self, BotError::Exchange { .. } | BotError::Timeout { .. })
    }
}

pub type BotResult<T> = Result<T, BotError>;
