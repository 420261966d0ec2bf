//! Arbitrage opportunity types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::fmt;
use super::{Pair, PriceSource};

/// Which pair to sell on and which to buy back on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Direction {
    pub sell_pair: Pair,
    pub buy_pair: Pair,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sell_{}_buy_{}",
            self.sell_pair.quote.as_str().to_ascii_lowercase(),
            self.buy_pair.quote.as_str().to_ascii_lowercase()
        )
    }
}

/// A candidate two-leg trade produced by one detection cycle
#[derive(Debug, Clone, Serialize)]
pub struct Opportunity {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub sell_price: Decimal,
    pub buy_price: Decimal,
    pub spread: Decimal,
    pub spread_pct: Decimal,
    pub amount: Decimal,
    pub gross_profit: Decimal,
    pub fees: Decimal,
    pub net_profit: Decimal,
    pub fee_rate: Decimal,
    pub price_source: PriceSource,
}

impl Opportunity {
    pub fn sell_pair(&self) -> Pair {
        self.direction.sell_pair
    }

    pub fn buy_pair(&self) -> Pair {
        self.direction.buy_pair
    }

    /// Quote-currency cost of the buy leg at the detected price
    pub fn buy_notional(&self) -> Decimal {
        self.amount * self.buy_price
    }

    /// Recomputes size-dependent figures for a new amount.
    pub fn resized(&self, amount: Decimal) -> Self {
        let mut resized = self.clone();
        resized.amount = amount;
        resized.gross_profit = amount * self.spread;
        resized.fees = (amount * self.sell_price + amount * self.buy_price) * self.fee_rate;
        resized.net_profit = resized.gross_profit - resized.fees;
        resized
    }

    pub fn roi_pct(&self) -> Decimal {
        let notional = self.amount * self.sell_price;
        if notional.is_zero() {
            return dec!(0);
        }
        self.net_profit / notional * dec!(100)
    }
}

/// Persisted form of an opportunity
#[derive(Debug, Clone, Serialize)]
pub struct OpportunityRecord {
    #[serde(flatten)]
    pub opportunity: Opportunity,
    pub executed: bool,
}
