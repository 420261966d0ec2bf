//! Pre-trade risk gate and system health

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};
use crate::{
    config::{RiskSettings, TradingConfig},
    errors::BotResult,
    ledger::BalanceLedger,
    storage::Store,
    types::{Currency, Opportunity, SystemHealth},
};

/// Outcome of the risk gate. Expected refusals are values; faults are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Approved,
    Rejected(String),
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved)
    }
}

fn reject(reason: String) -> BotResult<Verdict> {
    Ok(Verdict::Rejected(reason))
}

pub struct RiskController {
    settings: RiskSettings,
    ledger: Arc<BalanceLedger>,
    store: Arc<dyn Store>,
}

impl RiskController {
    pub fn new(settings: RiskSettings, ledger: Arc<BalanceLedger>, store: Arc<dyn Store>) -> Self {
        Self { settings, ledger, store }
    }

    /// Runs every check in order and stops at the first rejection.
    pub fn assess(&self, opportunity: &Opportunity, config: &TradingConfig) -> BotResult<Verdict> {
        let checks: [fn(&Self, &Opportunity, &TradingConfig) -> BotResult<Verdict>; 6] = [
            Self::check_daily_volume,
            Self::check_balance_safety,
            Self::check_pending_orders,
            Self::check_volatility,
            Self::check_spread,
            Self::check_frequency,
        ];
        for check in checks {
            let verdict = check(self, opportunity, config)?;
            if let Verdict::Rejected(reason) = &verdict {
                info!(opportunity_id = %opportunity.id, "🛑 Risk check failed: {}", reason);
                return Ok(verdict);
            }
        }
        debug!(opportunity_id = %opportunity.id, "All risk checks passed");
        Ok(Verdict::Approved)
    }

    fn check_daily_volume(&self, opportunity: &Opportunity, config: &TradingConfig) -> BotResult<Verdict> {
        let projected = self.store.todays_volume()? + opportunity.amount;
        if projected > config.daily_max_volume {
            return reject(format!(
                "Daily volume limit exceeded: {} > {}",
                projected.normalize(),
                config.daily_max_volume.normalize()
            ));
        }
        Ok(Verdict::Approved)
    }

    fn check_balance_safety(&self, opportunity: &Opportunity, config: &TradingConfig) -> BotResult<Verdict> {
        let margin = Decimal::ONE + config.risk_buffer;

        let xrp = self.ledger.available(opportunity.sell_pair().base)?;
        let required_xrp = opportunity.amount * margin;
        if xrp < required_xrp {
            return reject(format!(
                "Insufficient XRP balance with safety margin: {} < {}",
                xrp.normalize(),
                required_xrp.normalize()
            ));
        }

        let stable = opportunity.buy_pair().quote;
        let available = self.ledger.available(stable)?;
        let required = opportunity.buy_notional() * margin;
        if available < required {
            return reject(format!(
                "Insufficient {} balance with safety margin: {} < {}",
                stable,
                available.normalize(),
                required.round_dp(6).normalize()
            ));
        }
        Ok(Verdict::Approved)
    }

    fn check_pending_orders(&self, _opportunity: &Opportunity, config: &TradingConfig) -> BotResult<Verdict> {
        let pending = self.store.pending_trades()?.len();
        if pending >= config.max_pending_orders {
            return reject(format!("Too many pending orders: {} >= {}", pending, config.max_pending_orders));
        }
        Ok(Verdict::Approved)
    }

    /// Range of recent prices per pair. Skipped while history is too short.
    fn check_volatility(&self, opportunity: &Opportunity, _config: &TradingConfig) -> BotResult<Verdict> {
        let since = Utc::now() - ChronoDuration::seconds(self.settings.volatility_window_secs);
        for pair in [opportunity.sell_pair(), opportunity.buy_pair()] {
            let samples = self.store.recent_prices(pair, since, self.settings.volatility_sample_limit)?;
            if samples.len() < self.settings.volatility_min_samples {
                debug!(%pair, samples = samples.len(), "Insufficient price history for volatility check");
                continue;
            }
            let max = samples.iter().map(|s| s.price).max().unwrap_or_default();
            let min = samples.iter().map(|s| s.price).min().unwrap_or_default();
            if min <= Decimal::ZERO {
                continue;
            }
            let volatility = (max - min) / min;
            if volatility > self.settings.max_volatility {
                return reject(format!("High price volatility detected on {}: {:.4}", pair, volatility));
            }
        }
        Ok(Verdict::Approved)
    }

    fn check_spread(&self, opportunity: &Opportunity, config: &TradingConfig) -> BotResult<Verdict> {
        let min_spread_pct = config.spread_threshold * Decimal::ONE_HUNDRED;
        if opportunity.spread_pct < min_spread_pct {
            return reject(format!("Spread too small: {:.4}% < {:.4}%", opportunity.spread_pct, min_spread_pct));
        }
        if opportunity.spread_pct > self.settings.max_spread_pct {
            return reject(format!("Spread too large, possible data error: {:.4}%", opportunity.spread_pct));
        }
        Ok(Verdict::Approved)
    }

    fn check_frequency(&self, _opportunity: &Opportunity, _config: &TradingConfig) -> BotResult<Verdict> {
        let since = Utc::now() - ChronoDuration::seconds(self.settings.min_trade_interval_secs);
        let recent = self.store.trades_since(since)?.len();
        if recent > 0 {
            return reject(format!(
                "Trading too frequently: {} trades in last {}s",
                recent, self.settings.min_trade_interval_secs
            ));
        }
        Ok(Verdict::Approved)
    }

    /// Largest amount the detector may propose right now.
    pub fn max_safe_amount(&self, config: &TradingConfig) -> BotResult<Decimal> {
        let by_balance = self.ledger.available(Currency::Xrp)? * (Decimal::ONE - config.risk_buffer);
        let by_volume = config.daily_max_volume - self.store.todays_volume()?;
        let by_size = config.trade_amount * Decimal::TWO;
        Ok(by_balance.min(by_volume).min(by_size).max(Decimal::ZERO))
    }

    /// Connectivity problems and broken balance rows make the system unhealthy;
    /// negative totals and stale pending orders are warnings.
    pub fn check_system_health(&self) -> SystemHealth {
        let mut health = SystemHealth::healthy();

        if let Err(e) = self.store.ping() {
            health.fail(format!("Database connection error: {e}"));
        }

        for balance in self.ledger.snapshot() {
            if balance.total < Decimal::ZERO {
                health.warn(format!("Negative {} balance detected", balance.currency));
            }
            if balance.locked > balance.total {
                health.fail(format!("Locked {} exceeds total balance", balance.currency));
            }
        }

        match self.store.pending_trades() {
            Ok(pending) => {
                let now = Utc::now();
                let stale = pending
                    .iter()
                    .filter(|t| t.age_secs(now) > self.settings.stale_pending_secs as f64)
                    .count();
                if stale > 0 {
                    health.warn(format!(
                        "{} orders pending for >{} minutes",
                        stale,
                        self.settings.stale_pending_secs / 60
                    ));
                }
            }
            Err(e) => health.fail(format!("Pending order lookup failed: {e}")),
        }

        health
    }
}
