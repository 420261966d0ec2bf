//! Operator alerts for money-at-risk conditions

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::error;
use super::BreakerCategory;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    CircuitBreakerActivated {
        category: BreakerCategory,
        reason: String,
        count: u32,
        threshold: u32,
        at: DateTime<Utc>,
    },
    PartialExecution {
        opportunity_id: String,
        sell_trade_id: String,
        unhedged_amount: Decimal,
        reason: String,
        at: DateTime<Utc>,
    },
    /// An order filled on the exchange but the ledger could not settle it
    SettlementRejected {
        trade_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
    HealthCheckFailed {
        errors: Vec<String>,
        at: DateTime<Utc>,
    },
}

/// Fan-out channel for alerts. Every alert is also logged at error level so it
/// is never lost when nobody subscribes.
#[derive(Debug, Clone)]
pub struct AlertBus {
    sender: broadcast::Sender<Alert>,
}

impl AlertBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, alert: Alert) {
        match serde_json::to_string(&alert) {
            Ok(json) => error!(alert = %json, "🚨 OPERATOR ALERT"),
            Err(_) => error!(?alert, "🚨 OPERATOR ALERT"),
        }
        // No receivers is fine, the log line above is the fallback.
        let _ = self.sender.send(alert);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.sender.subscribe()
    }
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new(64)
    }
}
