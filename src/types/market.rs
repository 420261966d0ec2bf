//! Currencies, trading pairs and price quotes

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::BotError;

/// Currencies held by the bot. The derived ordering is the global lock order
/// used by the ledger for cross-currency transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Xrp,
    Usdt,
    Usdc,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Xrp, Currency::Usdt, Currency::Usdc];
    pub const STABLECOINS: [Currency; 2] = [Currency::Usdt, Currency::Usdc];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Xrp => "XRP",
            Currency::Usdt => "USDT",
            Currency::Usdc => "USDC",
        }
    }

    pub fn is_stablecoin(&self) -> bool {
        matches!(self, Currency::Usdt | Currency::Usdc)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "XRP" => Ok(Currency::Xrp),
            "USDT" => Ok(Currency::Usdt),
            "USDC" => Ok(Currency::Usdc),
            other => Err(BotError::Validation {
                reason: format!("unknown currency: {other}"),
            }),
        }
    }
}

/// A `BASE/QUOTE` trading pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub base: Currency,
    pub quote: Currency,
}

impl Pair {
    pub const XRP_USDT: Pair = Pair { base: Currency::Xrp, quote: Currency::Usdt };
    pub const XRP_USDC: Pair = Pair { base: Currency::Xrp, quote: Currency::Usdc };

    pub const fn new(base: Currency, quote: Currency) -> Self {
        Self { base, quote }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Pair {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s.split_once('/').ok_or_else(|| BotError::Validation {
            reason: format!("pair must look like BASE/QUOTE: {s}"),
        })?;
        Ok(Pair::new(base.parse()?, quote.parse()?))
    }
}

/// Latest price and 24h volume for one pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PriceQuote {
    pub fn new(price: Decimal, volume: Decimal) -> Self {
        Self { price, volume, timestamp: Utc::now() }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }
}

pub type PriceMap = HashMap<Pair, PriceQuote>;

/// Where a set of prices came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Push,
    Poll,
}

/// One persisted point of price history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSample {
    pub pair: Pair,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}
