#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use xrp_arb_bot::{
    config::{ExecutionSettings, SupervisorSettings},
    errors::{AlertBus, CircuitBreaker},
    exchange::{ExchangeConnector, PaperExchange},
    execution::OrderExecutor,
    ledger::BalanceLedger,
    storage::{MemoryStore, Store},
    supervisor::OrderSupervisor,
    types::{Balance, Currency, Direction, Opportunity, OrderType, Pair, PriceSource, Trade, TradeSide},
};

pub const SELL_PRICE: Decimal = dec!(0.5210);
pub const BUY_PRICE: Decimal = dec!(0.5190);

/// Store, ledger and paper exchange wired together the way the engine does it.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<BalanceLedger>,
    pub exchange: Arc<PaperExchange>,
    pub alerts: AlertBus,
    pub breaker: Arc<CircuitBreaker>,
}

impl Harness {
    pub fn new(xrp: Decimal, usdt: Decimal, usdc: Decimal) -> Self {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn Store> = store.clone();
        let ledger = Arc::new(
            BalanceLedger::with_balances(dyn_store, &[(Currency::Xrp, xrp), (Currency::Usdt, usdt), (Currency::Usdc, usdc)])
                .expect("ledger"),
        );
        let exchange = Arc::new(PaperExchange::new());
        exchange.set_price(Pair::XRP_USDT, SELL_PRICE);
        exchange.set_price(Pair::XRP_USDC, BUY_PRICE);
        let alerts = AlertBus::default();
        let breaker = Arc::new(CircuitBreaker::new(Duration::from_secs(3600), alerts.clone()));
        Self { store, ledger, exchange, alerts, breaker }
    }

    pub fn funded() -> Self {
        Self::new(dec!(1000), dec!(500), dec!(500))
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn connector(&self) -> Arc<dyn ExchangeConnector> {
        self.exchange.clone()
    }

    pub fn execution_settings() -> ExecutionSettings {
        ExecutionSettings {
            call_timeout: Duration::from_secs(1),
            status_poll_interval: Duration::from_millis(10),
            leg_wait: Duration::from_millis(100),
            journal_executions: true,
        }
    }

    pub fn executor(&self) -> OrderExecutor {
        OrderExecutor::new(Self::execution_settings(), self.ledger.clone(), self.store(), self.connector())
    }

    pub fn supervisor(&self) -> OrderSupervisor {
        OrderSupervisor::new(
            SupervisorSettings::default(),
            self.ledger.clone(),
            self.store(),
            self.connector(),
            Duration::from_secs(1),
            self.breaker.clone(),
            self.alerts.clone(),
        )
    }

    pub fn balance(&self, currency: Currency) -> Balance {
        self.ledger.balance(currency).expect("balance row")
    }

    /// Places a real paper order for a leg created `age_secs` ago and stores it
    /// as pending with its reservation held, as the executor would have.
    pub async fn pending_leg(&self, side: TradeSide, amount: Decimal, age_secs: i64) -> Trade {
        let (pair, price) = match side {
            TradeSide::Sell => (Pair::XRP_USDT, SELL_PRICE),
            TradeSide::Buy => (Pair::XRP_USDC, BUY_PRICE),
        };
        let mut trade = Trade::pending(side, pair, OrderType::Arbitrage, amount, price);
        trade.created_at = Utc::now() - ChronoDuration::seconds(age_secs);
        self.ledger
            .lock(trade.reserved_currency, trade.reserved_amount)
            .expect("reserve");
        let ack = self
            .exchange
            .create_order(pair, side, amount)
            .await
            .expect("paper order");
        trade.acknowledge(ack.id, ack.price);
        self.store.insert_trade(&trade).expect("insert");
        trade
    }
}

/// XRP/USDT at 0.5210 against XRP/USDC at 0.5190
pub fn opportunity(amount: Decimal) -> Opportunity {
    let spread = SELL_PRICE - BUY_PRICE;
    let fee_rate = dec!(0.001);
    let gross_profit = amount * spread;
    let fees = fee_rate * (amount * SELL_PRICE + amount * BUY_PRICE);
    Opportunity {
        id: uuid::Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        direction: Direction { sell_pair: Pair::XRP_USDT, buy_pair: Pair::XRP_USDC },
        sell_price: SELL_PRICE,
        buy_price: BUY_PRICE,
        spread,
        spread_pct: spread / BUY_PRICE * dec!(100),
        amount,
        gross_profit,
        fees,
        net_profit: gross_profit - fees,
        fee_rate,
        price_source: PriceSource::Push,
    }
}
