//! Deadline on every connector call

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use crate::{
    errors::{BotError, BotResult},
    types::{Pair, TradeSide},
};
use super::{ExchangeConnector, OrderAck, OrderState};

/// Wraps a connector so no call can hang longer than `limit`.
pub struct BoundedExchange {
    inner: Arc<dyn ExchangeConnector>,
    limit: Duration,
}

impl BoundedExchange {
    pub fn new(inner: Arc<dyn ExchangeConnector>, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T>(&self, operation: &str, call: impl Future<Output = BotResult<T>>) -> BotResult<T> {
        match tokio::time::timeout(self.limit, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, after_ms = self.limit.as_millis() as u64, "Exchange call timed out");
                Err(BotError::Timeout { operation: operation.to_string(), after: self.limit })
            }
        }
    }
}

#[async_trait]
impl ExchangeConnector for BoundedExchange {
    async fn create_order(&self, pair: Pair, side: TradeSide, amount: Decimal) -> BotResult<OrderAck> {
        self.bounded("create_order", self.inner.create_order(pair, side, amount)).await
    }

    async fn get_order_status(&self, order_id: &str, pair: Pair) -> BotResult<OrderState> {
        self.bounded("get_order_status", self.inner.get_order_status(order_id, pair)).await
    }

    async fn cancel_order(&self, order_id: &str, pair: Pair) -> BotResult<bool> {
        self.bounded("cancel_order", self.inner.cancel_order(order_id, pair)).await
    }
}
