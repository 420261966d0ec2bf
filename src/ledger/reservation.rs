//! Scoped fund reservations

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error};
use crate::{
    errors::{BotError, BotResult},
    types::{Credit, Currency, Debit},
};
use super::BalanceLedger;

/// Locked funds that are returned to the ledger when the guard is dropped.
///
/// A reservation ends in exactly one of three ways: [`commit`](Self::commit)
/// settles it (or finds the order already resolved elsewhere),
/// [`hand_off`](Self::hand_off) passes ownership of the lock to whoever tracks
/// the order (the supervisor), or it is dropped and unlocked.
#[must_use = "dropping a reservation releases the locked funds"]
pub struct Reservation {
    ledger: Arc<BalanceLedger>,
    currency: Currency,
    amount: Decimal,
    armed: bool,
}

impl Reservation {
    pub(super) fn new(ledger: Arc<BalanceLedger>, currency: Currency, amount: Decimal) -> Self {
        Self { ledger, currency, amount, armed: true }
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Settles the filled order this reservation covers once `claim` (the
    /// store's move out of `pending`) succeeds under the ledger's sections.
    ///
    /// `Ok(true)` settled it. `Ok(false)` means another writer resolved the
    /// order first and owns the lock now. On error nothing changed and the
    /// reservation is still held.
    pub fn commit(
        &mut self,
        debit: Debit,
        credit: Credit,
        claim: impl FnOnce() -> BotResult<bool>,
    ) -> BotResult<bool> {
        if debit.currency != self.currency || debit.unlock != self.amount {
            return Err(BotError::Validation {
                reason: format!(
                    "settlement of {} {} does not match reservation of {} {}",
                    debit.unlock, debit.currency, self.amount, self.currency
                ),
            });
        }
        let settled = self.ledger.settle_claimed(debit, credit, claim)?;
        self.armed = false;
        Ok(settled)
    }

    /// Keeps the funds locked; the caller now owns the unlock.
    pub fn hand_off(mut self) -> (Currency, Decimal) {
        self.armed = false;
        debug!(currency = %self.currency, amount = %self.amount, "Reservation handed off");
        (self.currency, self.amount)
    }

    /// Unlocks now and reports failure instead of logging it.
    pub fn release(mut self) -> BotResult<()> {
        self.armed = false;
        self.ledger.unlock(self.currency, self.amount)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.ledger.unlock(self.currency, self.amount) {
            error!(currency = %self.currency, amount = %self.amount, "Failed to release reservation: {}", e);
        }
    }
}
