//! Trading configuration snapshot supplied by the surrounding system

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use crate::errors::{BotError, BotResult};

/// Read-only to the core. The engine takes one snapshot per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Minimum spread as a fraction (0.003 = 0.3%)
    pub spread_threshold: Decimal,
    /// Base XRP amount per arbitrage
    pub trade_amount: Decimal,
    pub daily_max_volume: Decimal,
    pub risk_buffer: Decimal,
    pub max_pending_orders: usize,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            spread_threshold: dec!(0.003),
            trade_amount: dec!(100),
            daily_max_volume: dec!(5000),
            risk_buffer: dec!(0.1),
            max_pending_orders: 3,
        }
    }
}

impl TradingConfig {
    pub fn validate(&self) -> BotResult<()> {
        if self.spread_threshold <= Decimal::ZERO {
            return Err(BotError::Validation { reason: "spread_threshold must be positive".into() });
        }
        if self.trade_amount <= Decimal::ZERO {
            return Err(BotError::Validation { reason: "trade_amount must be positive".into() });
        }
        if self.risk_buffer < Decimal::ZERO {
            return Err(BotError::Validation { reason: "risk_buffer must not be negative".into() });
        }
        Ok(())
    }
}

/// Source of configuration snapshots
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> BotResult<TradingConfig>;
}

/// Shared, externally updatable configuration
#[derive(Debug, Clone, Default)]
pub struct SharedTradingConfig {
    inner: Arc<RwLock<TradingConfig>>,
}

impl SharedTradingConfig {
    pub fn new(config: TradingConfig) -> Self {
        Self { inner: Arc::new(RwLock::new(config)) }
    }

    /// Replaces the configuration. Invalid configurations are refused.
    pub fn update(&self, config: TradingConfig) -> BotResult<()> {
        config.validate()?;
        *self.inner.write() = config;
        Ok(())
    }
}

impl ConfigSource for SharedTradingConfig {
    fn snapshot(&self) -> BotResult<TradingConfig> {
        let config = self.inner.read().clone();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_invalid_update() {
        let shared = SharedTradingConfig::default();
        let bad = TradingConfig { trade_amount: dec!(0), ..TradingConfig::default() };
        assert!(shared.update(bad).is_err());
        assert_eq!(shared.snapshot().unwrap(), TradingConfig::default());
    }
}
