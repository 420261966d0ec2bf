//! Trade (single order leg) types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use super::{Credit, Currency, Debit, Pair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Sell,
    Buy,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TradeSide::Sell => "sell",
            TradeSide::Buy => "buy",
        })
    }
}

/// Order category, fixed when the order is created. Selects the supervisor timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Arbitrage,
    Limit,
}

impl OrderType {
    pub const ALL: [OrderType; 3] = [OrderType::Market, OrderType::Arbitrage, OrderType::Limit];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Arbitrage => "arbitrage",
            OrderType::Limit => "limit",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Completed,
    Cancelled,
    Failed,
    TimeoutCancelled,
    TimeoutFailed,
    TimeoutError,
    CancelFailed,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Pending)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TradeStatus::TimeoutCancelled | TradeStatus::TimeoutFailed | TradeStatus::TimeoutError
        )
    }
}

/// One order leg as persisted by the store.
#[derive(Debug, Clone, Serialize)]
pub struct Trade {
    pub id: String,
    pub opportunity_id: Option<String>,
    pub side: TradeSide,
    pub pair: Pair,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Decimal,
    pub total_value: Decimal,
    pub spread: Option<Decimal>,
    pub profit_loss: Option<Decimal>,
    pub status: TradeStatus,
    pub order_id: Option<String>,
    /// Currency the ledger locked for this order
    pub reserved_currency: Currency,
    pub reserved_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Trade {
    /// New pending leg. Sell legs reserve the base asset, buy legs the quote notional.
    pub fn pending(
        side: TradeSide,
        pair: Pair,
        order_type: OrderType,
        amount: Decimal,
        expected_price: Decimal,
    ) -> Self {
        let total_value = amount * expected_price;
        let (reserved_currency, reserved_amount) = match side {
            TradeSide::Sell => (pair.base, amount),
            TradeSide::Buy => (pair.quote, total_value),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            opportunity_id: None,
            side,
            pair,
            order_type,
            amount,
            price: expected_price,
            total_value,
            spread: None,
            profit_loss: None,
            status: TradeStatus::Pending,
            order_id: None,
            reserved_currency,
            reserved_amount,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_milliseconds() as f64 / 1000.0
    }

    /// Records the exchange acknowledgement on a pending leg.
    pub fn acknowledge(&mut self, order_id: String, price: Decimal) {
        self.order_id = Some(order_id);
        self.price = price;
        self.total_value = self.amount * price;
    }

    /// Ledger movements that settle this leg once it has filled.
    pub fn settlement(&self) -> (Debit, Credit) {
        match self.side {
            TradeSide::Sell => (
                Debit {
                    currency: self.reserved_currency,
                    unlock: self.reserved_amount,
                    spend: self.amount,
                },
                Credit { currency: self.pair.quote, amount: self.total_value },
            ),
            TradeSide::Buy => (
                Debit {
                    currency: self.reserved_currency,
                    unlock: self.reserved_amount,
                    spend: self.total_value,
                },
                Credit { currency: self.pair.base, amount: self.amount },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sell_leg_reserves_base_and_credits_quote() {
        let mut trade = Trade::pending(TradeSide::Sell, Pair::XRP_USDT, OrderType::Arbitrage, dec!(100), dec!(0.52));
        assert_eq!(trade.reserved_currency, Currency::Xrp);
        assert_eq!(trade.reserved_amount, dec!(100));

        trade.acknowledge("ord-1".into(), dec!(0.521));
        let (debit, credit) = trade.settlement();
        assert_eq!(debit.spend, dec!(100));
        assert_eq!(credit.currency, Currency::Usdt);
        assert_eq!(credit.amount, dec!(52.100));
    }

    #[test]
    fn buy_leg_spends_realized_cost_but_unlocks_reservation() {
        let mut trade = Trade::pending(TradeSide::Buy, Pair::XRP_USDC, OrderType::Arbitrage, dec!(100), dec!(0.519));
        assert_eq!(trade.reserved_currency, Currency::Usdc);
        assert_eq!(trade.reserved_amount, dec!(51.900));

        trade.acknowledge("ord-2".into(), dec!(0.518));
        let (debit, credit) = trade.settlement();
        assert_eq!(debit.unlock, dec!(51.900));
        assert_eq!(debit.spend, dec!(51.800));
        assert_eq!(credit.currency, Currency::Xrp);
        assert_eq!(credit.amount, dec!(100));
    }
}
