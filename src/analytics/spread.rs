//! Rolling spread and price statistics

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::warn;
use crate::types::{Pair, PriceMap};

const SPREAD_LOOKBACK: usize = 20;
const MIN_TREND_SAMPLES: usize = 5;
const HIGH_VOLATILITY: f64 = 0.02;
const CAUTIOUS_SIZE_FACTOR: f64 = 0.5;

/// Heuristic reading of the current spread against its recent history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadSignal {
    /// Not enough history to judge
    Unknown,
    Normal,
    /// Far above its recent mean
    Extreme,
    /// Wide but already closing
    Closing,
    /// Unusually narrow or a choppy market
    Cautious,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpreadStats {
    pub mean: f64,
    pub std_dev: f64,
    pub current: f64,
    pub z_score: f64,
    pub trend: f64,
    pub ema_short: f64,
    pub ema_long: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketInsight {
    pub spread: Option<SpreadStats>,
    pub price_trend: f64,
    pub price_volatility: f64,
    pub signal: SpreadSignal,
    /// Multiplier the engine applies to the proposed amount
    pub size_factor: f64,
}

pub struct SpreadAnalytics {
    prices: HashMap<Pair, VecDeque<(DateTime<Utc>, f64)>>,
    spreads: VecDeque<(DateTime<Utc>, f64)>,
    max_age: ChronoDuration,
    capacity: usize,
}

impl SpreadAnalytics {
    pub fn new(max_age_secs: i64, capacity: usize) -> Self {
        SpreadAnalytics {
            prices: HashMap::new(),
            spreads: VecDeque::new(),
            max_age: ChronoDuration::seconds(max_age_secs),
            capacity: capacity.max(SPREAD_LOOKBACK),
        }
    }

    fn push(window: &mut VecDeque<(DateTime<Utc>, f64)>, at: DateTime<Utc>, value: f64, max_age: ChronoDuration, capacity: usize) {
        window.push_back((at, value));
        while let Some((timestamp, _)) = window.front() {
            if at - *timestamp > max_age || window.len() > capacity {
                window.pop_front();
            } else if *timestamp > at {
                warn!("Encountered a timestamp in the future: {:?}", timestamp);
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Records one evaluated price set. The spread is tracked once both pairs are present.
    pub fn add_prices(&mut self, prices: &PriceMap) {
        for (pair, quote) in prices {
            if let Some(price) = quote.price.to_f64() {
                let window = self.prices.entry(*pair).or_default();
                Self::push(window, quote.timestamp, price, self.max_age, self.capacity);
            }
        }

        if let (Some(usdt), Some(usdc)) = (prices.get(&Pair::XRP_USDT), prices.get(&Pair::XRP_USDC)) {
            let low = usdt.price.min(usdc.price);
            if low > Decimal::ZERO {
                let spread_pct = ((usdt.price - usdc.price).abs() / low * Decimal::ONE_HUNDRED)
                    .to_f64()
                    .unwrap_or(0.0);
                let at = usdt.timestamp.max(usdc.timestamp);
                Self::push(&mut self.spreads, at, spread_pct, self.max_age, self.capacity);
            }
        }
    }

    pub fn sample_count(&self) -> usize {
        self.spreads.len()
    }

    /// Linear-regression slope normalized by the average step of the range, in [-1, 1].
    pub fn trend_strength(values: &[f64]) -> f64 {
        if values.len() < MIN_TREND_SAMPLES {
            return 0.0;
        }
        let n = values.len() as f64;
        let mean_x = (n - 1.0) / 2.0;
        let mean_y = values.iter().sum::<f64>() / n;
        let (mut cov, mut var) = (0.0, 0.0);
        for (i, y) in values.iter().enumerate() {
            let dx = i as f64 - mean_x;
            cov += dx * (y - mean_y);
            var += dx * dx;
        }
        let range = values.iter().cloned().fold(f64::MIN, f64::max) - values.iter().cloned().fold(f64::MAX, f64::min);
        if var == 0.0 || range == 0.0 {
            return 0.0;
        }
        let slope = cov / var;
        (slope / (range / n)).clamp(-1.0, 1.0)
    }

    /// Standard deviation of step-to-step returns
    pub fn return_volatility(values: &[f64]) -> f64 {
        let returns: Vec<f64> = values
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect();
        if returns.is_empty() {
            return 0.0;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        variance.sqrt()
    }

    pub fn ema(values: &[f64], alpha: f64) -> f64 {
        let mut iter = values.iter();
        let Some(first) = iter.next() else {
            return 0.0;
        };
        iter.fold(*first, |acc, v| alpha * v + (1.0 - alpha) * acc)
    }

    pub fn spread_stats(&self) -> Option<SpreadStats> {
        if self.spreads.len() < SPREAD_LOOKBACK {
            return None;
        }
        let all: Vec<f64> = self.spreads.iter().map(|(_, s)| *s).collect();
        let recent = &all[all.len() - SPREAD_LOOKBACK..];
        let n = recent.len() as f64;
        let mean = recent.iter().sum::<f64>() / n;
        let std_dev = (recent.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();
        let current = recent[recent.len() - 1];
        let z_score = if std_dev > 0.0 { (current - mean) / std_dev } else { 0.0 };
        Some(SpreadStats {
            mean,
            std_dev,
            current,
            z_score,
            trend: Self::trend_strength(recent),
            ema_short: Self::ema(&all[all.len().saturating_sub(10)..], 0.4),
            ema_long: Self::ema(&all, 0.2),
        })
    }

    fn mid_prices(&self) -> Vec<f64> {
        let usdt = self.prices.get(&Pair::XRP_USDT);
        let usdc = self.prices.get(&Pair::XRP_USDC);
        match (usdt, usdc) {
            (Some(a), Some(b)) => a.iter().zip(b.iter()).map(|((_, x), (_, y))| (x + y) / 2.0).collect(),
            (Some(only), None) | (None, Some(only)) => only.iter().map(|(_, p)| *p).collect(),
            (None, None) => Vec::new(),
        }
    }

    pub fn insight(&self) -> MarketInsight {
        let mids = self.mid_prices();
        let price_trend = Self::trend_strength(&mids);
        let price_volatility = Self::return_volatility(&mids);
        let spread = self.spread_stats();

        let signal = match &spread {
            None => SpreadSignal::Unknown,
            Some(_) if price_volatility > HIGH_VOLATILITY => SpreadSignal::Cautious,
            Some(s) if s.z_score > 2.5 => SpreadSignal::Extreme,
            Some(s) if s.z_score < -1.5 => SpreadSignal::Cautious,
            Some(s) if s.z_score > 1.5 && s.trend < 0.0 => SpreadSignal::Closing,
            Some(_) => SpreadSignal::Normal,
        };
        let size_factor = if signal == SpreadSignal::Cautious { CAUTIOUS_SIZE_FACTOR } else { 1.0 };

        MarketInsight { spread, price_trend, price_volatility, signal, size_factor }
    }
}

impl Default for SpreadAnalytics {
    fn default() -> Self {
        Self::new(3600, 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceQuote;
    use rust_decimal_macros::dec;

    fn feed(analytics: &mut SpreadAnalytics, usdt: Decimal, usdc: Decimal, at: DateTime<Utc>) {
        let prices: PriceMap = [
            (Pair::XRP_USDT, PriceQuote { price: usdt, volume: dec!(1), timestamp: at }),
            (Pair::XRP_USDC, PriceQuote { price: usdc, volume: dec!(1), timestamp: at }),
        ]
        .into_iter()
        .collect();
        analytics.add_prices(&prices);
    }

    #[test]
    fn trend_strength_follows_direction() {
        let rising: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let falling: Vec<f64> = rising.iter().rev().cloned().collect();
        assert!(SpreadAnalytics::trend_strength(&rising) > 0.9);
        assert!(SpreadAnalytics::trend_strength(&falling) < -0.9);
        assert_eq!(SpreadAnalytics::trend_strength(&[1.0, 1.0, 1.0, 1.0, 1.0]), 0.0);
        assert_eq!(SpreadAnalytics::trend_strength(&[1.0, 2.0]), 0.0);
    }

    #[test]
    fn unknown_until_enough_spreads() {
        let mut analytics = SpreadAnalytics::default();
        let start = Utc::now();
        for i in 0..5 {
            feed(&mut analytics, dec!(0.521), dec!(0.519), start + ChronoDuration::seconds(i));
        }
        let insight = analytics.insight();
        assert_eq!(insight.signal, SpreadSignal::Unknown);
        assert_eq!(insight.size_factor, 1.0);
    }

    #[test]
    fn narrowing_spread_halves_size() {
        let mut analytics = SpreadAnalytics::default();
        let start = Utc::now() - ChronoDuration::seconds(60);
        for i in 0..19 {
            feed(&mut analytics, dec!(0.5220), dec!(0.5190), start + ChronoDuration::seconds(i));
        }
        feed(&mut analytics, dec!(0.5192), dec!(0.5190), start + ChronoDuration::seconds(19));

        let insight = analytics.insight();
        let stats = insight.spread.as_ref().unwrap();
        assert!(stats.z_score < -1.5);
        assert_eq!(insight.signal, SpreadSignal::Cautious);
        assert_eq!(insight.size_factor, 0.5);
    }

    #[test]
    fn old_samples_fall_out_of_the_window() {
        let mut analytics = SpreadAnalytics::new(60, 100);
        let start = Utc::now() - ChronoDuration::seconds(600);
        feed(&mut analytics, dec!(0.52), dec!(0.51), start);
        feed(&mut analytics, dec!(0.52), dec!(0.51), start + ChronoDuration::seconds(300));
        assert_eq!(analytics.sample_count(), 1);
    }
}
