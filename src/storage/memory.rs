//! In-memory store with optional JSON-lines journaling

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;
use crate::{
    errors::{BotError, BotResult},
    storage::{save_opportunity, save_trade, save_trade_execution, Store},
    types::{
        Balance, Currency, ExecutionRecord, Opportunity, OpportunityRecord, Pair, PriceSample, Trade,
        TradeStatus,
    },
};

const MAX_PRICE_SAMPLES_PER_PAIR: usize = 1000;

#[derive(Default)]
struct Tables {
    balances: HashMap<Currency, Balance>,
    opportunities: HashMap<String, OpportunityRecord>,
    trades: Vec<Trade>,
    trade_index: HashMap<String, usize>,
    prices: HashMap<Pair, VecDeque<PriceSample>>,
    executions: Vec<ExecutionRecord>,
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    journal_dir: Option<PathBuf>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            journal_dir: None,
            offline: AtomicBool::new(false),
        }
    }

    /// Mirrors opportunities, trades and executions into daily journals under `dir`.
    pub fn with_journal(dir: impl Into<PathBuf>) -> Self {
        Self { journal_dir: Some(dir.into()), ..Self::new() }
    }

    /// Simulates losing the database connection: ping and every write fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self, context: &str) -> BotResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BotError::persistence(context, anyhow::anyhow!("store is offline")));
        }
        Ok(())
    }

    fn journal_trade(&self, trade: &Trade) {
        if let Some(dir) = &self.journal_dir {
            if let Err(e) = save_trade(dir, trade) {
                warn!("Failed to journal trade {}: {}", trade.id, e);
            }
        }
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.tables.read().executions.clone()
    }

    pub fn all_trades(&self) -> Vec<Trade> {
        self.tables.read().trades.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn ping(&self) -> BotResult<()> {
        self.ensure_online("ping")
    }

    fn save_balance(&self, balance: &Balance) -> BotResult<()> {
        self.ensure_online("save balance")?;
        self.tables.write().balances.insert(balance.currency, balance.clone());
        Ok(())
    }

    fn load_balances(&self) -> BotResult<Vec<Balance>> {
        self.ensure_online("load balances")?;
        let mut balances: Vec<Balance> = self.tables.read().balances.values().cloned().collect();
        balances.sort_by_key(|b| b.currency);
        Ok(balances)
    }

    fn record_opportunity(&self, opportunity: &Opportunity) -> BotResult<()> {
        self.ensure_online("record opportunity")?;
        let record = OpportunityRecord { opportunity: opportunity.clone(), executed: false };
        if let Some(dir) = &self.journal_dir {
            save_opportunity(dir, &record)
                .map_err(|e| BotError::persistence("journal opportunity", e))?;
        }
        self.tables.write().opportunities.insert(opportunity.id.clone(), record);
        Ok(())
    }

    fn mark_opportunity_executed(&self, opportunity_id: &str) -> BotResult<bool> {
        self.ensure_online("mark opportunity executed")?;
        let mut tables = self.tables.write();
        match tables.opportunities.get_mut(opportunity_id) {
            Some(record) if !record.executed => {
                record.executed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn opportunity(&self, opportunity_id: &str) -> BotResult<Option<OpportunityRecord>> {
        Ok(self.tables.read().opportunities.get(opportunity_id).cloned())
    }

    fn insert_trade(&self, trade: &Trade) -> BotResult<()> {
        self.ensure_online("insert trade")?;
        {
            let mut tables = self.tables.write();
            if tables.trade_index.contains_key(&trade.id) {
                return Err(BotError::Validation {
                    reason: format!("trade {} already exists", trade.id),
                });
            }
            let index = tables.trades.len();
            tables.trades.push(trade.clone());
            tables.trade_index.insert(trade.id.clone(), index);
        }
        self.journal_trade(trade);
        Ok(())
    }

    fn update_pending_trade(&self, trade: &Trade) -> BotResult<()> {
        self.ensure_online("update trade")?;
        {
            let mut tables = self.tables.write();
            let index = *tables
                .trade_index
                .get(&trade.id)
                .ok_or_else(|| BotError::TradeNotFound(trade.id.clone()))?;
            let stored = &mut tables.trades[index];
            if stored.status.is_terminal() {
                return Err(BotError::TradeNotPending { trade_id: trade.id.clone(), status: stored.status });
            }
            if trade.status.is_terminal() {
                return Err(BotError::Validation {
                    reason: "terminal transitions go through finalize_trade".into(),
                });
            }
            *stored = trade.clone();
        }
        self.journal_trade(trade);
        Ok(())
    }

    fn finalize_trade(&self, trade: &Trade) -> BotResult<bool> {
        self.ensure_online("finalize trade")?;
        if !trade.status.is_terminal() {
            return Err(BotError::Validation {
                reason: format!("finalize_trade needs a terminal status, got {:?}", trade.status),
            });
        }
        {
            let mut tables = self.tables.write();
            let index = *tables
                .trade_index
                .get(&trade.id)
                .ok_or_else(|| BotError::TradeNotFound(trade.id.clone()))?;
            let stored = &mut tables.trades[index];
            if stored.status != TradeStatus::Pending {
                return Ok(false);
            }
            *stored = trade.clone();
        }
        self.journal_trade(trade);
        Ok(true)
    }

    fn attach_profit(&self, trade_id: &str, profit_loss: Decimal) -> BotResult<()> {
        self.ensure_online("attach profit")?;
        let mut tables = self.tables.write();
        let index = *tables
            .trade_index
            .get(trade_id)
            .ok_or_else(|| BotError::TradeNotFound(trade_id.to_string()))?;
        tables.trades[index].profit_loss = Some(profit_loss);
        Ok(())
    }

    fn trade(&self, trade_id: &str) -> BotResult<Option<Trade>> {
        let tables = self.tables.read();
        Ok(tables.trade_index.get(trade_id).map(|i| tables.trades[*i].clone()))
    }

    fn pending_trades(&self) -> BotResult<Vec<Trade>> {
        self.ensure_online("pending trades")?;
        Ok(self
            .tables
            .read()
            .trades
            .iter()
            .filter(|t| t.status == TradeStatus::Pending)
            .cloned()
            .collect())
    }

    fn trades_since(&self, since: DateTime<Utc>) -> BotResult<Vec<Trade>> {
        self.ensure_online("trades since")?;
        Ok(self
            .tables
            .read()
            .trades
            .iter()
            .filter(|t| t.created_at >= since)
            .cloned()
            .collect())
    }

    fn opportunity_trades(&self, opportunity_id: &str) -> BotResult<Vec<Trade>> {
        self.ensure_online("opportunity trades")?;
        Ok(self
            .tables
            .read()
            .trades
            .iter()
            .filter(|t| t.opportunity_id.as_deref() == Some(opportunity_id))
            .cloned()
            .collect())
    }

    fn record_price(&self, sample: PriceSample) -> BotResult<()> {
        self.ensure_online("record price")?;
        let mut tables = self.tables.write();
        let history = tables.prices.entry(sample.pair).or_default();
        history.push_back(sample);
        while history.len() > MAX_PRICE_SAMPLES_PER_PAIR {
            history.pop_front();
        }
        Ok(())
    }

    fn recent_prices(&self, pair: Pair, since: DateTime<Utc>, limit: usize) -> BotResult<Vec<PriceSample>> {
        self.ensure_online("recent prices")?;
        let tables = self.tables.read();
        let Some(history) = tables.prices.get(&pair) else {
            return Ok(Vec::new());
        };
        Ok(history
            .iter()
            .rev()
            .filter(|s| s.timestamp >= since)
            .take(limit)
            .cloned()
            .collect())
    }

    fn record_execution(&self, record: &ExecutionRecord) -> BotResult<()> {
        self.ensure_online("record execution")?;
        if let Some(dir) = &self.journal_dir {
            if let Err(e) = save_trade_execution(dir, record) {
                warn!("Failed to journal execution {}: {}", record.id, e);
            }
        }
        self.tables.write().executions.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderType, TradeSide};
    use rust_decimal_macros::dec;

    fn pending_sell() -> Trade {
        Trade::pending(TradeSide::Sell, Pair::XRP_USDT, OrderType::Arbitrage, dec!(10), dec!(0.5))
    }

    #[test]
    fn terminal_trades_are_never_mutated() {
        let store = MemoryStore::new();
        let mut trade = pending_sell();
        store.insert_trade(&trade).unwrap();

        trade.status = TradeStatus::Completed;
        assert!(store.finalize_trade(&trade).unwrap());

        trade.status = TradeStatus::TimeoutCancelled;
        assert!(!store.finalize_trade(&trade).unwrap());

        trade.status = TradeStatus::Pending;
        assert!(matches!(
            store.update_pending_trade(&trade),
            Err(BotError::TradeNotPending { .. })
        ));
        assert_eq!(store.trade(&trade.id).unwrap().unwrap().status, TradeStatus::Completed);
    }

    #[test]
    fn offline_store_refuses_writes() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(store.ping().is_err());
        assert!(store.insert_trade(&pending_sell()).is_err());
        store.set_offline(false);
        assert!(store.insert_trade(&pending_sell()).is_ok());
    }

    #[test]
    fn recent_prices_are_newest_first_and_limited() {
        let store = MemoryStore::new();
        let start = Utc::now() - chrono::Duration::seconds(60);
        for i in 0..10 {
            store
                .record_price(PriceSample {
                    pair: Pair::XRP_USDT,
                    price: dec!(0.5) + Decimal::new(i, 3),
                    volume: dec!(1),
                    timestamp: start + chrono::Duration::seconds(i),
                })
                .unwrap();
        }
        let recent = store.recent_prices(Pair::XRP_USDT, start, 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].price, dec!(0.509));
    }
}
