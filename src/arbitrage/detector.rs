//! Spread detection between XRP/USDT and XRP/USDC

use chrono::Utc;
use rust_decimal::prelude::*;
use std::fmt;
use tracing::debug;
use crate::{
    config::{DetectorSettings, TradingConfig},
    feed::PriceSources,
    types::{Direction, Opportunity, Pair, PriceMap, PriceSource},
};

pub const ARBITRAGE_PAIRS: [Pair; 2] = [Pair::XRP_USDT, Pair::XRP_USDC];

/// Why a price set did not produce an opportunity
#[derive(Debug, Clone, PartialEq)]
pub enum NoOpportunity {
    MissingPrice(Pair),
    SpreadTooSmall { spread_pct: Decimal, required_pct: Decimal },
    LowLiquidity { pair: Pair, volume: Decimal },
    NoCapacity,
    InsufficientProfit { net_profit: Decimal, minimum: Decimal },
}

impl fmt::Display for NoOpportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoOpportunity::MissingPrice(pair) => write!(f, "no price for {pair}"),
            NoOpportunity::SpreadTooSmall { spread_pct, required_pct } => {
                write!(f, "spread {:.4}% below required {:.4}%", spread_pct, required_pct)
            }
            NoOpportunity::LowLiquidity { pair, volume } => write!(f, "{pair} volume {volume} below floor"),
            NoOpportunity::NoCapacity => write!(f, "no safe trade capacity left"),
            NoOpportunity::InsufficientProfit { net_profit, minimum } => {
                write!(f, "net profit {:.6} below minimum {}", net_profit, minimum)
            }
        }
    }
}

pub struct OpportunityDetector {
    settings: DetectorSettings,
    sources: PriceSources,
}

impl OpportunityDetector {
    pub fn new(settings: DetectorSettings, sources: PriceSources) -> Self {
        Self { settings, sources }
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// Current prices for both pairs, push source first.
    pub async fn fetch_prices(&self) -> Option<(PriceMap, PriceSource)> {
        self.sources.current(&ARBITRAGE_PAIRS).await
    }

    pub async fn detect(&self, config: &TradingConfig, max_safe_amount: Decimal) -> Option<Opportunity> {
        let (prices, source) = self.fetch_prices().await?;
        self.evaluate(&prices, source, config, max_safe_amount).ok()
    }

    /// Applies the spread, liquidity and profitability filters to one price set.
    pub fn evaluate(
        &self,
        prices: &PriceMap,
        source: PriceSource,
        config: &TradingConfig,
        max_safe_amount: Decimal,
    ) -> Result<Opportunity, NoOpportunity> {
        let usdt = prices
            .get(&Pair::XRP_USDT)
            .ok_or(NoOpportunity::MissingPrice(Pair::XRP_USDT))?;
        let usdc = prices
            .get(&Pair::XRP_USDC)
            .ok_or(NoOpportunity::MissingPrice(Pair::XRP_USDC))?;

        let (sell_pair, sell_price, buy_pair, buy_price) = if usdt.price >= usdc.price {
            (Pair::XRP_USDT, usdt.price, Pair::XRP_USDC, usdc.price)
        } else {
            (Pair::XRP_USDC, usdc.price, Pair::XRP_USDT, usdt.price)
        };
        if buy_price <= Decimal::ZERO {
            return Err(NoOpportunity::MissingPrice(buy_pair));
        }

        let spread = sell_price - buy_price;
        let spread_pct = spread / buy_price * Decimal::ONE_HUNDRED;
        let required_pct = (config.spread_threshold * Decimal::ONE_HUNDRED).max(self.settings.min_profitable_spread_pct);
        if spread_pct < required_pct {
            debug!(%spread_pct, %required_pct, "Spread below threshold");
            return Err(NoOpportunity::SpreadTooSmall { spread_pct, required_pct });
        }

        for (pair, quote) in [(Pair::XRP_USDT, usdt), (Pair::XRP_USDC, usdc)] {
            if quote.volume < self.settings.min_liquidity_volume {
                return Err(NoOpportunity::LowLiquidity { pair, volume: quote.volume });
            }
        }

        let scale = (spread_pct / self.settings.reference_spread_pct).min(self.settings.max_size_multiplier);
        let amount = (config.trade_amount * scale).min(max_safe_amount).round_dp(6);
        if amount <= Decimal::ZERO {
            return Err(NoOpportunity::NoCapacity);
        }

        let gross_profit = amount * spread;
        let fees = self.settings.taker_fee_rate * (amount * sell_price + amount * buy_price);
        let net_profit = gross_profit - fees;
        if net_profit < self.settings.min_net_profit {
            debug!(%net_profit, "Opportunity not profitable after fees");
            return Err(NoOpportunity::InsufficientProfit { net_profit, minimum: self.settings.min_net_profit });
        }

        Ok(Opportunity {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            direction: Direction { sell_pair, buy_pair },
            sell_price,
            buy_price,
            spread,
            spread_pct,
            amount,
            gross_profit,
            fees,
            net_profit,
            fee_rate: self.settings.taker_fee_rate,
            price_source: source,
        })
    }
}
