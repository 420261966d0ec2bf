//! Per-currency balance ledger

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use chrono::Utc;
use tracing::{debug, error};
use crate::{
    errors::{BotError, BotResult},
    storage::Store,
    types::{Balance, Credit, Currency, Debit},
};
use super::Reservation;

/// Authoritative available/locked funds. Each currency row has its own
/// exclusive section; cross-currency operations take both sections in
/// `Currency` order. Every change is persisted before it becomes visible.
pub struct BalanceLedger {
    rows: BTreeMap<Currency, Mutex<Balance>>,
    store: Arc<dyn Store>,
}

impl BalanceLedger {
    /// Loads persisted rows. Currencies without a row start at zero.
    pub fn open(store: Arc<dyn Store>) -> BotResult<Self> {
        let mut rows: BTreeMap<Currency, Mutex<Balance>> = Currency::ALL
            .iter()
            .map(|c| (*c, Mutex::new(Balance::new(*c, Decimal::ZERO))))
            .collect();
        for balance in store.load_balances()? {
            if !balance.is_consistent() || balance.total < Decimal::ZERO {
                return Err(BotError::NegativeBalance {
                    currency: balance.currency,
                    total: balance.total,
                    locked: balance.locked,
                    delta: Decimal::ZERO,
                });
            }
            rows.insert(balance.currency, Mutex::new(balance));
        }
        Ok(Self { rows, store })
    }

    /// Starts from the given totals with nothing locked, persisting each row.
    pub fn with_balances(store: Arc<dyn Store>, initial: &[(Currency, Decimal)]) -> BotResult<Self> {
        let ledger = Self::open(store)?;
        for (currency, total) in initial {
            if *total < Decimal::ZERO {
                return Err(BotError::Validation {
                    reason: format!("initial {currency} balance is negative: {total}"),
                });
            }
            ledger.mutate(*currency, |current| {
                Ok(Balance { total: *total, locked: Decimal::ZERO, ..current.clone() })
            })?;
        }
        Ok(ledger)
    }

    fn row(&self, currency: Currency) -> BotResult<&Mutex<Balance>> {
        self.rows.get(&currency).ok_or(BotError::UnknownCurrency(currency))
    }

    fn non_negative(amount: Decimal, what: &str) -> BotResult<()> {
        if amount < Decimal::ZERO {
            return Err(BotError::Validation { reason: format!("{what} amount must not be negative: {amount}") });
        }
        Ok(())
    }

    /// Computes the next row, persists it, and only then replaces the
    /// in-memory row. A failed check or write leaves the row untouched.
    fn mutate(&self, currency: Currency, next: impl FnOnce(&Balance) -> BotResult<Balance>) -> BotResult<Balance> {
        let row = self.row(currency)?;
        let mut guard = row.lock();
        let mut updated = next(&*guard)?;
        updated.updated_at = Utc::now();
        self.store.save_balance(&updated)?;
        *guard = updated.clone();
        Ok(updated)
    }

    pub fn balance(&self, currency: Currency) -> BotResult<Balance> {
        Ok(self.row(currency)?.lock().clone())
    }

    pub fn available(&self, currency: Currency) -> BotResult<Decimal> {
        Ok(self.row(currency)?.lock().available())
    }

    /// Every row, each read under its own section.
    pub fn snapshot(&self) -> Vec<Balance> {
        self.rows.values().map(|row| row.lock().clone()).collect()
    }

    pub fn lock(&self, currency: Currency, amount: Decimal) -> BotResult<()> {
        Self::non_negative(amount, "lock")?;
        let updated = self.mutate(currency, |b| {
            if b.available() < amount {
                return Err(BotError::InsufficientFunds { currency, available: b.available(), requested: amount });
            }
            Ok(Balance { locked: b.locked + amount, ..b.clone() })
        })?;
        debug!(%currency, %amount, locked = %updated.locked, "Locked funds");
        Ok(())
    }

    pub fn unlock(&self, currency: Currency, amount: Decimal) -> BotResult<()> {
        Self::non_negative(amount, "unlock")?;
        let updated = self.mutate(currency, |b| {
            if amount > b.locked {
                return Err(BotError::OverUnlock { currency, locked: b.locked, requested: amount });
            }
            Ok(Balance { locked: b.locked - amount, ..b.clone() })
        })?;
        debug!(%currency, %amount, locked = %updated.locked, "Unlocked funds");
        Ok(())
    }

    /// Signed change to the total. The total may never drop below zero or below
    /// what is currently locked.
    pub fn adjust(&self, currency: Currency, delta: Decimal) -> BotResult<()> {
        let updated = self.mutate(currency, |b| {
            let total = b.total + delta;
            if total < Decimal::ZERO || total < b.locked {
                return Err(BotError::NegativeBalance { currency, total: b.total, locked: b.locked, delta });
            }
            Ok(Balance { total, ..b.clone() })
        })?;
        debug!(%currency, %delta, total = %updated.total, "Adjusted balance");
        Ok(())
    }

    /// Locks `amount` and returns a guard that gives it back when dropped,
    /// unless the guard is committed or handed off.
    pub fn reserve(self: &Arc<Self>, currency: Currency, amount: Decimal) -> BotResult<Reservation> {
        self.lock(currency, amount)?;
        Ok(Reservation::new(Arc::clone(self), currency, amount))
    }

    /// Settles a filled order as one transaction across two currencies:
    /// release `debit.unlock` and spend `debit.spend` from the debit row, then
    /// credit the other row. Either both rows change and persist or neither does.
    pub fn settle(&self, debit: Debit, credit: Credit) -> BotResult<()> {
        self.settle_claimed(debit, credit, || Ok(true)).map(|_| ())
    }

    /// [`settle`](Self::settle) gated on `claim`, which runs once both rows
    /// have been checked and persisted, with their sections still held. The
    /// rows only change if it answers true; otherwise the persisted rows are
    /// written back and its answer (or error) is returned.
    pub fn settle_claimed(
        &self,
        debit: Debit,
        credit: Credit,
        claim: impl FnOnce() -> BotResult<bool>,
    ) -> BotResult<bool> {
        Self::non_negative(debit.unlock, "unlock")?;
        Self::non_negative(debit.spend, "spend")?;
        Self::non_negative(credit.amount, "credit")?;
        let settled = self.apply_pair(debit, credit, false, claim)?;
        if settled {
            debug!(
                debit = %debit.currency, spend = %debit.spend, unlocked = %debit.unlock,
                credit = %credit.currency, amount = %credit.amount,
                "Settled order"
            );
        }
        Ok(settled)
    }

    /// Moves available funds from one currency to another at parity.
    pub fn transfer(&self, from: Currency, to: Currency, amount: Decimal) -> BotResult<()> {
        Self::non_negative(amount, "transfer")?;
        if from == to {
            return Err(BotError::Validation { reason: format!("cannot transfer {from} to itself") });
        }
        let debit = Debit { currency: from, unlock: Decimal::ZERO, spend: amount };
        let credit = Credit { currency: to, amount };
        self.apply_pair(debit, credit, true, || Ok(true)).map(|_| ())
    }

    fn apply_pair(
        &self,
        debit: Debit,
        credit: Credit,
        from_available: bool,
        claim: impl FnOnce() -> BotResult<bool>,
    ) -> BotResult<bool> {
        let check_debit = |b: &Balance| -> BotResult<Balance> {
            if debit.unlock > b.locked {
                return Err(BotError::OverUnlock { currency: debit.currency, locked: b.locked, requested: debit.unlock });
            }
            if from_available && b.available() < debit.spend {
                return Err(BotError::InsufficientFunds {
                    currency: debit.currency,
                    available: b.available(),
                    requested: debit.spend,
                });
            }
            let locked = b.locked - debit.unlock;
            let total = b.total - debit.spend;
            if total < Decimal::ZERO || total < locked {
                return Err(BotError::NegativeBalance {
                    currency: debit.currency,
                    total: b.total,
                    locked,
                    delta: -debit.spend,
                });
            }
            Ok(Balance { total, locked, updated_at: Utc::now(), ..b.clone() })
        };

        if debit.currency == credit.currency {
            let mut guard = self.row(debit.currency)?.lock();
            let debited = check_debit(&*guard)?;
            let updated = Balance { total: debited.total + credit.amount, ..debited };
            self.store.save_balance(&updated)?;
            if !self.claim_or_restore(claim, &[&*guard])? {
                return Ok(false);
            }
            *guard = updated;
            return Ok(true);
        }

        let debit_row = self.row(debit.currency)?;
        let credit_row = self.row(credit.currency)?;
        let (mut debit_guard, mut credit_guard) = if debit.currency < credit.currency {
            let d = debit_row.lock();
            let c = credit_row.lock();
            (d, c)
        } else {
            let c = credit_row.lock();
            let d = debit_row.lock();
            (d, c)
        };

        let debited = check_debit(&*debit_guard)?;
        let credited = Balance {
            total: credit_guard.total + credit.amount,
            updated_at: Utc::now(),
            ..credit_guard.clone()
        };

        self.store.save_balance(&debited)?;
        if let Err(e) = self.store.save_balance(&credited) {
            self.restore(&[&*debit_guard]);
            return Err(e);
        }
        if !self.claim_or_restore(claim, &[&*debit_guard, &*credit_guard])? {
            return Ok(false);
        }

        *debit_guard = debited;
        *credit_guard = credited;
        Ok(true)
    }

    /// Runs `claim`; unless it answers true, `previous` is persisted again.
    fn claim_or_restore(&self, claim: impl FnOnce() -> BotResult<bool>, previous: &[&Balance]) -> BotResult<bool> {
        let claimed = claim();
        if !matches!(claimed, Ok(true)) {
            self.restore(previous);
        }
        claimed
    }

    fn restore(&self, previous: &[&Balance]) {
        for balance in previous {
            if let Err(e) = self.store.save_balance(balance) {
                error!(currency = %balance.currency, "Failed to restore persisted balance: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use rust_decimal_macros::dec;

    fn ledger_with(store: Arc<MemoryStore>) -> Arc<BalanceLedger> {
        Arc::new(
            BalanceLedger::with_balances(
                store,
                &[(Currency::Xrp, dec!(1000)), (Currency::Usdt, dec!(500)), (Currency::Usdc, dec!(500))],
            )
            .unwrap(),
        )
    }

    fn ledger() -> Arc<BalanceLedger> {
        ledger_with(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn lock_refuses_more_than_available() {
        let ledger = ledger();
        ledger.lock(Currency::Xrp, dec!(900)).unwrap();
        let err = ledger.lock(Currency::Xrp, dec!(200)).unwrap_err();
        assert!(matches!(err, BotError::InsufficientFunds { available, .. } if available == dec!(100)));
        assert_eq!(ledger.balance(Currency::Xrp).unwrap().locked, dec!(900));
    }

    #[test]
    fn over_unlock_leaves_balance_unchanged() {
        let ledger = ledger();
        ledger.lock(Currency::Usdt, dec!(50)).unwrap();
        let before = ledger.balance(Currency::Usdt).unwrap();

        let err = ledger.unlock(Currency::Usdt, dec!(60)).unwrap_err();
        assert!(matches!(err, BotError::OverUnlock { .. }));

        let after = ledger.balance(Currency::Usdt).unwrap();
        assert_eq!(after.total, before.total);
        assert_eq!(after.locked, before.locked);
    }

    #[test]
    fn adjust_cannot_drop_total_below_locked() {
        let ledger = ledger();
        ledger.lock(Currency::Usdc, dec!(400)).unwrap();
        assert!(matches!(
            ledger.adjust(Currency::Usdc, dec!(-200)),
            Err(BotError::NegativeBalance { .. })
        ));
        ledger.adjust(Currency::Usdc, dec!(-100)).unwrap();
        assert_eq!(ledger.balance(Currency::Usdc).unwrap().available(), dec!(0));
    }

    #[test]
    fn reservation_unlocks_on_drop() {
        let ledger = ledger();
        {
            let _reservation = ledger.reserve(Currency::Xrp, dec!(100)).unwrap();
            assert_eq!(ledger.available(Currency::Xrp).unwrap(), dec!(900));
        }
        assert_eq!(ledger.available(Currency::Xrp).unwrap(), dec!(1000));
    }

    #[test]
    fn settle_moves_both_rows() {
        let ledger = ledger();
        ledger.lock(Currency::Xrp, dec!(100)).unwrap();
        ledger
            .settle(
                Debit { currency: Currency::Xrp, unlock: dec!(100), spend: dec!(100) },
                Credit { currency: Currency::Usdt, amount: dec!(52.1) },
            )
            .unwrap();
        let xrp = ledger.balance(Currency::Xrp).unwrap();
        assert_eq!((xrp.total, xrp.locked), (dec!(900), dec!(0)));
        assert_eq!(ledger.balance(Currency::Usdt).unwrap().total, dec!(552.1));
    }

    #[test]
    fn failed_persistence_rolls_back() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_with(store.clone());
        store.set_offline(true);

        assert!(matches!(ledger.lock(Currency::Xrp, dec!(10)), Err(BotError::Persistence { .. })));
        assert!(ledger.transfer(Currency::Usdt, Currency::Usdc, dec!(10)).is_err());

        store.set_offline(false);
        assert_eq!(ledger.balance(Currency::Xrp).unwrap().locked, dec!(0));
        assert_eq!(ledger.balance(Currency::Usdt).unwrap().total, dec!(500));
        assert_eq!(ledger.balance(Currency::Usdc).unwrap().total, dec!(500));
    }

    #[test]
    fn transfer_uses_available_funds_only() {
        let ledger = ledger();
        ledger.lock(Currency::Usdt, dec!(450)).unwrap();
        assert!(matches!(
            ledger.transfer(Currency::Usdt, Currency::Usdc, dec!(100)),
            Err(BotError::InsufficientFunds { .. })
        ));
        ledger.transfer(Currency::Usdt, Currency::Usdc, dec!(50)).unwrap();
        assert_eq!(ledger.balance(Currency::Usdt).unwrap().total, dec!(450));
        assert_eq!(ledger.balance(Currency::Usdc).unwrap().total, dec!(550));
    }

    fn rows(store: &MemoryStore) -> Vec<(Currency, Decimal, Decimal)> {
        store.load_balances().unwrap().iter().map(|b| (b.currency, b.total, b.locked)).collect()
    }

    #[test]
    fn refused_claim_leaves_rows_untouched() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_with(store.clone());
        ledger.lock(Currency::Usdc, dec!(51.9)).unwrap();
        let before = rows(&store);

        let debit = Debit { currency: Currency::Usdc, unlock: dec!(51.9), spend: dec!(51.9) };
        let credit = Credit { currency: Currency::Xrp, amount: dec!(100) };
        assert!(!ledger.settle_claimed(debit, credit, || Ok(false)).unwrap());
        assert_eq!(rows(&store), before);
        assert_eq!(ledger.balance(Currency::Usdc).unwrap().locked, dec!(51.9));

        let err = ledger
            .settle_claimed(debit, credit, || Err(BotError::Validation { reason: "store down".into() }))
            .unwrap_err();
        assert!(matches!(err, BotError::Validation { .. }));
        assert_eq!(rows(&store), before);

        assert!(ledger.settle_claimed(debit, credit, || Ok(true)).unwrap());
        assert_eq!(ledger.balance(Currency::Xrp).unwrap().total, dec!(1100));
        assert_eq!(ledger.balance(Currency::Usdc).unwrap().total, dec!(448.1));
    }

    #[test]
    fn claim_is_not_consulted_when_funds_fall_short() {
        let ledger = ledger();
        ledger.lock(Currency::Usdc, dec!(500)).unwrap();
        let mut consulted = false;
        let err = ledger
            .settle_claimed(
                Debit { currency: Currency::Usdc, unlock: dec!(500), spend: dec!(530) },
                Credit { currency: Currency::Xrp, amount: dec!(1000) },
                || {
                    consulted = true;
                    Ok(true)
                },
            )
            .unwrap_err();
        assert!(err.is_ledger_violation());
        assert!(!consulted);
        assert_eq!(ledger.balance(Currency::Usdc).unwrap().locked, dec!(500));
    }
}
