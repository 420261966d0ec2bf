//! Balance rows and ledger movement types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use super::Currency;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Balance {
    pub currency: Currency,
    pub total: Decimal,
    pub locked: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    pub fn new(currency: Currency, total: Decimal) -> Self {
        Self { currency, total, locked: Decimal::ZERO, updated_at: Utc::now() }
    }

    pub fn available(&self) -> Decimal {
        self.total - self.locked
    }

    pub fn is_consistent(&self) -> bool {
        self.locked >= Decimal::ZERO && self.locked <= self.total
    }
}

/// Outgoing side of a settlement: release `unlock` from locked, remove `spend` from total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Debit {
    pub currency: Currency,
    pub unlock: Decimal,
    pub spend: Decimal,
}

/// Incoming side of a settlement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Credit {
    pub currency: Currency,
    pub amount: Decimal,
}
