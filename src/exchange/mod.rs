//! Exchange connector contract and implementations

pub mod bounded;
pub mod paper;

pub use bounded::*;
pub use paper::*;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use crate::{
    errors::BotResult,
    types::{Pair, TradeSide},
};

/// Exchange acknowledgement of a new order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderAck {
    pub id: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Open,
    Partial,
    Closed,
}

/// Every error from a connector is recoverable by the caller.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    async fn create_order(&self, pair: Pair, side: TradeSide, amount: Decimal) -> BotResult<OrderAck>;

    async fn get_order_status(&self, order_id: &str, pair: Pair) -> BotResult<OrderState>;

    /// Ok(false) means the exchange refused the cancel.
    async fn cancel_order(&self, order_id: &str, pair: Pair) -> BotResult<bool>;
}
