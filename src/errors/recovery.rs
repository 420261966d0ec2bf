//! Error recovery strategies

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::Level;
use super::{BotError, BreakerCategory};

/// What the engine does with an error it did not expect to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Bad or missing data, drop this cycle quietly.
    Skip { log_level: Level },
    /// Ledger invariant refused the operation; nothing was changed.
    Abort,
    /// Exchange leg failed; balances were released, count it.
    Record { category: BreakerCategory },
    /// Money is at risk, surface to an operator and halt execution.
    Alert { category: BreakerCategory },
    /// Execution is halted until an operator resets the breaker.
    Halt,
    /// Unexpected fault, counted toward the system error breaker.
    Escalate,
}

pub struct ErrorRecovery {
    pub error_counts: Arc<RwLock<HashMap<String, u32>>>,
}

impl ErrorRecovery {
    pub fn new() -> Self {
        Self {
            error_counts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn handle_error(&self, error: &BotError) -> RecoveryAction {
        let error_type = Self::classify_error(error);
        *self
            .error_counts
            .write()
            .await
            .entry(error_type.to_string())
            .or_insert(0) += 1;

        match error {
            BotError::Validation { .. } | BotError::DuplicateExecution { .. } => {
                RecoveryAction::Skip { log_level: Level::DEBUG }
            }
            BotError::Network { .. } => RecoveryAction::Skip { log_level: Level::WARN },
            e if e.is_ledger_violation() => RecoveryAction::Abort,
            e if e.is_exchange_failure() => RecoveryAction::Record {
                category: BreakerCategory::ExecutionFailure,
            },
            BotError::PartialExecution { .. } => RecoveryAction::Alert {
                category: BreakerCategory::UnhedgedPosition,
            },
            BotError::CircuitBreakerOpen { .. } => RecoveryAction::Halt,
            _ => RecoveryAction::Escalate,
        }
    }

    pub fn classify_error(error: &BotError) -> &'static str {
        match error {
            BotError::Validation { .. } => "validation",
            BotError::InsufficientFunds { .. } => "insufficient_funds",
            BotError::OverUnlock { .. } => "over_unlock",
            BotError::NegativeBalance { .. } => "negative_balance",
            BotError::UnknownCurrency(_) => "unknown_currency",
            BotError::Exchange { .. } => "exchange_failure",
            BotError::Timeout { .. } => "exchange_timeout",
            BotError::Network { .. } => "network",
            BotError::PartialExecution { .. } => "partial_execution",
            BotError::CircuitBreakerOpen { .. } => "circuit_breaker",
            BotError::DuplicateExecution { .. } => "duplicate_execution",
            BotError::TradeNotPending { .. } => "trade_not_pending",
            BotError::TradeNotFound(_) => "trade_not_found",
            BotError::Persistence { .. } => "persistence",
        }
    }

    pub async fn snapshot(&self) -> HashMap<String, u32> {
        self.error_counts.read().await.clone()
    }
}

impl Default for ErrorRecovery {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Currency;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn maps_taxonomy_to_actions() {
        let recovery = ErrorRecovery::new();

        let insufficient = BotError::InsufficientFunds {
            currency: Currency::Xrp,
            available: dec!(1),
            requested: dec!(2),
        };
        assert_eq!(recovery.handle_error(&insufficient).await, RecoveryAction::Abort);

        let partial = BotError::PartialExecution { sell_trade_id: "t".into(), reason: "x".into() };
        assert_eq!(
            recovery.handle_error(&partial).await,
            RecoveryAction::Alert { category: BreakerCategory::UnhedgedPosition }
        );

        let exchange = BotError::exchange("create_order", "boom");
        assert_eq!(
            recovery.handle_error(&exchange).await,
            RecoveryAction::Record { category: BreakerCategory::ExecutionFailure }
        );

        let persistence = BotError::persistence("write", anyhow::anyhow!("disk full"));
        assert_eq!(recovery.handle_error(&persistence).await, RecoveryAction::Escalate);

        let counts = recovery.snapshot().await;
        assert_eq!(counts.get("insufficient_funds"), Some(&1));
        assert_eq!(counts.len(), 4);
    }
}
