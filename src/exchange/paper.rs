//! Simulated exchange for paper trading and tests

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;
use crate::{
    errors::{BotError, BotResult},
    feed::PriceCache,
    types::{Pair, TradeSide},
};
use super::{ExchangeConnector, OrderAck, OrderState};

/// How a newly created order behaves
#[derive(Debug, Clone, PartialEq)]
pub enum FillMode {
    /// Closed as soon as it is created
    Immediate,
    /// Open for this many status polls, then closed
    AfterPolls(u32),
    /// Stays partially filled
    Partial,
    /// Never fills
    Never,
    /// Creation is rejected with this message
    Reject(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelMode {
    Accept,
    Refuse,
    Error,
}

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub operation: &'static str,
    pub order_id: Option<String>,
    pub side: Option<TradeSide>,
    pub state: Option<OrderState>,
    pub at: Instant,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    side: TradeSide,
    mode: FillMode,
    state: OrderState,
    polls: u32,
    cancelled: bool,
}

struct Script {
    fill_modes: HashMap<TradeSide, FillMode>,
    cancel_mode: CancelMode,
    status_error: bool,
}

pub struct PaperExchange {
    orders: Mutex<HashMap<String, PaperOrder>>,
    prices: Mutex<HashMap<Pair, Decimal>>,
    price_cache: Option<Arc<PriceCache>>,
    script: Mutex<Script>,
    calls: Mutex<Vec<CallRecord>>,
    latency: Duration,
    slippage_bps: u32,
    failure_rate: f64,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
            prices: Mutex::new(HashMap::new()),
            price_cache: None,
            script: Mutex::new(Script {
                fill_modes: HashMap::new(),
                cancel_mode: CancelMode::Accept,
                status_error: false,
            }),
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            slippage_bps: 0,
            failure_rate: 0.0,
        }
    }

    /// Fills at the latest pushed price when no explicit price is set.
    pub fn with_price_cache(mut self, cache: Arc<PriceCache>) -> Self {
        self.price_cache = Some(cache);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Adverse slippage applied to every fill price
    pub fn with_slippage_bps(mut self, bps: u32) -> Self {
        self.slippage_bps = bps;
        self
    }

    /// Fraction of order creations rejected at random
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn set_price(&self, pair: Pair, price: Decimal) {
        self.prices.lock().insert(pair, price);
    }

    pub fn set_fill_mode(&self, side: TradeSide, mode: FillMode) {
        self.script.lock().fill_modes.insert(side, mode);
    }

    pub fn set_cancel_mode(&self, mode: CancelMode) {
        self.script.lock().cancel_mode = mode;
    }

    pub fn set_status_error(&self, failing: bool) {
        self.script.lock().status_error = failing;
    }

    /// Forces an existing order closed, as if it filled on the exchange.
    pub fn fill(&self, order_id: &str) {
        if let Some(order) = self.orders.lock().get_mut(order_id) {
            order.state = OrderState::Closed;
        }
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    pub fn is_cancelled(&self, order_id: &str) -> bool {
        self.orders.lock().get(order_id).map(|o| o.cancelled).unwrap_or(false)
    }

    fn record(&self, operation: &'static str, order_id: Option<&str>, side: Option<TradeSide>, state: Option<OrderState>) {
        self.calls.lock().push(CallRecord {
            operation,
            order_id: order_id.map(str::to_string),
            side,
            state,
            at: Instant::now(),
        });
    }

    fn market_price(&self, pair: Pair) -> BotResult<Decimal> {
        if let Some(price) = self.prices.lock().get(&pair) {
            return Ok(*price);
        }
        self.price_cache
            .as_ref()
            .and_then(|cache| cache.snapshot().get(&pair).map(|q| q.price))
            .ok_or_else(|| BotError::exchange("create_order", format!("no market for {pair}")))
    }

    fn fill_price(&self, price: Decimal, side: TradeSide) -> Decimal {
        let slip = Decimal::from(self.slippage_bps) / dec!(10000);
        match side {
            TradeSide::Sell => price * (dec!(1) - slip),
            TradeSide::Buy => price * (dec!(1) + slip),
        }
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeConnector for PaperExchange {
    async fn create_order(&self, pair: Pair, side: TradeSide, amount: Decimal) -> BotResult<OrderAck> {
        self.simulate_latency().await;
        self.record("create_order", None, Some(side), None);

        if amount <= Decimal::ZERO {
            return Err(BotError::exchange("create_order", format!("invalid amount {amount}")));
        }
        let mode = self
            .script
            .lock()
            .fill_modes
            .get(&side)
            .cloned()
            .unwrap_or(FillMode::Immediate);
        if let FillMode::Reject(message) = &mode {
            return Err(BotError::exchange("create_order", message));
        }
        if self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate {
            return Err(BotError::exchange("create_order", "simulated rejection"));
        }

        let price = self.fill_price(self.market_price(pair)?, side).round_dp(8);
        let id = format!("paper-{}", uuid::Uuid::new_v4().simple());
        let state = match mode {
            FillMode::Immediate => OrderState::Closed,
            FillMode::Partial => OrderState::Partial,
            _ => OrderState::Open,
        };
        self.orders.lock().insert(
            id.clone(),
            PaperOrder { side, mode, state, polls: 0, cancelled: false },
        );
        info!("🎭 Paper order {} {} {} {} @ {}", id, side, amount, pair, price);
        Ok(OrderAck { id, price })
    }

    async fn get_order_status(&self, order_id: &str, _pair: Pair) -> BotResult<OrderState> {
        self.simulate_latency().await;
        if self.script.lock().status_error {
            self.record("get_order_status", Some(order_id), None, None);
            return Err(BotError::exchange("get_order_status", "status endpoint unavailable"));
        }

        let (side, state) = {
            let mut orders = self.orders.lock();
            let order = orders
                .get_mut(order_id)
                .ok_or_else(|| BotError::exchange("get_order_status", format!("unknown order {order_id}")))?;
            order.polls += 1;
            if let FillMode::AfterPolls(n) = order.mode {
                if !order.cancelled && order.state == OrderState::Open && order.polls > n {
                    order.state = OrderState::Closed;
                }
            }
            (order.side, order.state)
        };
        self.record("get_order_status", Some(order_id), Some(side), Some(state));
        Ok(state)
    }

    async fn cancel_order(&self, order_id: &str, _pair: Pair) -> BotResult<bool> {
        self.simulate_latency().await;
        self.record("cancel_order", Some(order_id), None, None);
        match self.script.lock().cancel_mode {
            CancelMode::Error => return Err(BotError::exchange("cancel_order", "cancel endpoint unavailable")),
            CancelMode::Refuse => return Ok(false),
            CancelMode::Accept => {}
        }
        let mut orders = self.orders.lock();
        match orders.get_mut(order_id) {
            Some(order) if order.state != OrderState::Closed => {
                order.cancelled = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
