//! Bot configuration settings and environment variable handling

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use crate::types::OrderType;

// Configuration constants
pub const MIN_TRADE_AMOUNT_XRP: Decimal = dec!(1);
pub const MAX_TRADE_AMOUNT_XRP: Decimal = dec!(10000);
pub const TAKER_FEE_RATE: Decimal = dec!(0.001); // 0.1% per leg
pub const MIN_PROFITABLE_SPREAD_PCT: Decimal = dec!(0.25);
pub const MIN_LIQUIDITY_VOLUME: Decimal = dec!(10000);
pub const MIN_NET_PROFIT: Decimal = dec!(0.05);
pub const PRICE_STALENESS_SECONDS: i64 = 10;

// Risk constants
pub const MAX_VOLATILITY: Decimal = dec!(0.02); // 2% over the window
pub const MAX_SPREAD_PCT: Decimal = dec!(5);
pub const MIN_TRADE_INTERVAL_SECS: i64 = 30;
pub const STALE_PENDING_SECS: i64 = 300;

// Execution constants
pub const EXCHANGE_CALL_TIMEOUT_MS: u64 = 5000;

/// Spread and sizing filters used by the detector
#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub taker_fee_rate: Decimal,
    pub min_profitable_spread_pct: Decimal,
    pub min_liquidity_volume: Decimal,
    pub min_net_profit: Decimal,
    pub price_staleness_secs: i64,
    /// Spread (in %) at which the base amount is traded unscaled
    pub reference_spread_pct: Decimal,
    pub max_size_multiplier: Decimal,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            taker_fee_rate: TAKER_FEE_RATE,
            min_profitable_spread_pct: MIN_PROFITABLE_SPREAD_PCT,
            min_liquidity_volume: MIN_LIQUIDITY_VOLUME,
            min_net_profit: MIN_NET_PROFIT,
            price_staleness_secs: PRICE_STALENESS_SECONDS,
            reference_spread_pct: dec!(0.3),
            max_size_multiplier: dec!(2.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskSettings {
    pub max_volatility: Decimal,
    pub volatility_window_secs: i64,
    pub volatility_min_samples: usize,
    pub volatility_sample_limit: usize,
    pub max_spread_pct: Decimal,
    pub min_trade_interval_secs: i64,
    pub stale_pending_secs: i64,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_volatility: MAX_VOLATILITY,
            volatility_window_secs: 300,
            volatility_min_samples: 5,
            volatility_sample_limit: 20,
            max_spread_pct: MAX_SPREAD_PCT,
            min_trade_interval_secs: MIN_TRADE_INTERVAL_SECS,
            stale_pending_secs: STALE_PENDING_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Bound on every single connector call
    pub call_timeout: Duration,
    pub status_poll_interval: Duration,
    /// How long a leg is awaited before it is handed to the supervisor
    pub leg_wait: Duration,
    pub journal_executions: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_millis(EXCHANGE_CALL_TIMEOUT_MS),
            status_poll_interval: Duration::from_millis(100),
            leg_wait: Duration::from_secs(3),
            journal_executions: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub interval: Duration,
    pub market_timeout_secs: u64,
    pub arbitrage_timeout_secs: u64,
    pub limit_timeout_secs: u64,
    pub max_timeouts_per_type: u32,
    pub execution_sample_size: usize,
}

impl SupervisorSettings {
    pub fn timeout_for(&self, order_type: OrderType) -> u64 {
        match order_type {
            OrderType::Market => self.market_timeout_secs,
            OrderType::Arbitrage => self.arbitrage_timeout_secs,
            OrderType::Limit => self.limit_timeout_secs,
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            market_timeout_secs: 10,
            arbitrage_timeout_secs: 20,
            limit_timeout_secs: 30,
            max_timeouts_per_type: 5,
            execution_sample_size: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub base_interval: Duration,
    /// Floor so the price source is never hammered
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub health_check_every: u64,
    pub health_retry_delay: Duration,
    pub maintenance_every: u64,
    pub activity_window: usize,
    pub large_loss_threshold: Decimal,
    pub breaker_window: Duration,
    /// Minimum share of combined stablecoin holdings each stablecoin should keep
    pub rebalance_min_ratio: Decimal,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(5),
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            health_check_every: 6,
            health_retry_delay: Duration::from_secs(10),
            maintenance_every: 12,
            activity_window: 20,
            large_loss_threshold: dec!(5),
            breaker_window: Duration::from_secs(3600),
            rebalance_min_ratio: dec!(0.3),
        }
    }
}

/// Starting balances and files for the paper-trading binary
#[derive(Debug, Clone)]
pub struct PaperSettings {
    pub initial_xrp: Decimal,
    pub initial_usdt: Decimal,
    pub initial_usdc: Decimal,
    pub output_dir: PathBuf,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            initial_xrp: dec!(1000),
            initial_usdt: dec!(500),
            initial_usdc: dec!(500),
            output_dir: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub trading: super::TradingConfig,
    pub detector: DetectorSettings,
    pub risk: RiskSettings,
    pub execution: ExecutionSettings,
    pub supervisor: SupervisorSettings,
    pub engine: EngineSettings,
    pub paper: PaperSettings,
}

fn env_decimal(key: &str) -> Option<Decimal> {
    env::var(key).ok().and_then(|s| Decimal::from_str(s.trim()).ok())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn load() -> Self {
        let defaults = Self::default();

        let trading = super::TradingConfig {
            spread_threshold: env_decimal("SPREAD_THRESHOLD")
                .unwrap_or(defaults.trading.spread_threshold)
                .max(dec!(0.0001)),
            trade_amount: env_decimal("TRADE_AMOUNT")
                .unwrap_or(defaults.trading.trade_amount)
                .max(MIN_TRADE_AMOUNT_XRP)
                .min(MAX_TRADE_AMOUNT_XRP),
            daily_max_volume: env_decimal("DAILY_MAX_VOLUME")
                .unwrap_or(defaults.trading.daily_max_volume),
            risk_buffer: env_decimal("RISK_BUFFER")
                .unwrap_or(defaults.trading.risk_buffer)
                .max(dec!(0))
                .min(dec!(0.9)),
            max_pending_orders: env_parse("MAX_PENDING_ORDERS")
                .unwrap_or(defaults.trading.max_pending_orders),
        };

        let detector = DetectorSettings {
            taker_fee_rate: env_decimal("TAKER_FEE_RATE").unwrap_or(TAKER_FEE_RATE),
            min_net_profit: env_decimal("MIN_NET_PROFIT")
                .unwrap_or(MIN_NET_PROFIT)
                .max(dec!(0)),
            min_liquidity_volume: env_decimal("MIN_LIQUIDITY_VOLUME").unwrap_or(MIN_LIQUIDITY_VOLUME),
            ..defaults.detector
        };

        let supervisor = SupervisorSettings {
            interval: Duration::from_millis(
                env_parse("SUPERVISOR_INTERVAL_MS").unwrap_or(2000u64).max(100),
            ),
            max_timeouts_per_type: env_parse("MAX_TIMEOUTS_PER_TYPE")
                .unwrap_or(defaults.supervisor.max_timeouts_per_type),
            ..defaults.supervisor
        };

        let engine = EngineSettings {
            base_interval: Duration::from_millis(
                env_parse("ENGINE_INTERVAL_MS").unwrap_or(5000u64).max(1000),
            ),
            large_loss_threshold: env_decimal("LARGE_LOSS_THRESHOLD")
                .unwrap_or(defaults.engine.large_loss_threshold),
            ..defaults.engine
        };

        let paper = PaperSettings {
            initial_xrp: env_decimal("PAPER_XRP").unwrap_or(defaults.paper.initial_xrp),
            initial_usdt: env_decimal("PAPER_USDT").unwrap_or(defaults.paper.initial_usdt),
            initial_usdc: env_decimal("PAPER_USDC").unwrap_or(defaults.paper.initial_usdc),
            output_dir: env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.paper.output_dir),
        };

        let execution = ExecutionSettings {
            journal_executions: env::var("JOURNAL_EXECUTIONS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
            ..defaults.execution
        };

        Self {
            trading,
            detector,
            risk: defaults.risk,
            execution,
            supervisor,
            engine,
            paper,
        }
    }
}
