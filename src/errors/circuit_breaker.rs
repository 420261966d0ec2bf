//! Per-category circuit breaker. Once a category trips it stays active until
//! an operator calls [`CircuitBreaker::reset`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use super::{Alert, AlertBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerCategory {
    OrderTimeout,
    LargeLoss,
    ExecutionFailure,
    SystemError,
    UnhedgedPosition,
}

impl BreakerCategory {
    pub const ALL: [BreakerCategory; 5] = [
        BreakerCategory::OrderTimeout,
        BreakerCategory::LargeLoss,
        BreakerCategory::ExecutionFailure,
        BreakerCategory::SystemError,
        BreakerCategory::UnhedgedPosition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerCategory::OrderTimeout => "order_timeout",
            BreakerCategory::LargeLoss => "large_loss",
            BreakerCategory::ExecutionFailure => "execution_failure",
            BreakerCategory::SystemError => "system_error",
            BreakerCategory::UnhedgedPosition => "unhedged_position",
        }
    }

    /// Events tolerated before the category trips (trips when the count exceeds it).
    pub fn default_threshold(&self) -> u32 {
        match self {
            BreakerCategory::OrderTimeout => 5,
            BreakerCategory::LargeLoss => 3,
            BreakerCategory::ExecutionFailure => 5,
            BreakerCategory::SystemError => 10,
            BreakerCategory::UnhedgedPosition => 0,
        }
    }
}

impl fmt::Display for BreakerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public view of one category
#[derive(Debug, Clone, Serialize)]
pub struct BreakerState {
    pub category: BreakerCategory,
    pub count: u32,
    pub threshold: u32,
    pub active: bool,
    pub reason: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct CategoryState {
    events: VecDeque<DateTime<Utc>>,
    threshold: u32,
    active: bool,
    reason: Option<String>,
    activated_at: Option<DateTime<Utc>>,
    tripped_count: u32,
}

impl CategoryState {
    fn new(threshold: u32) -> Self {
        Self {
            events: VecDeque::new(),
            threshold,
            active: false,
            reason: None,
            activated_at: None,
            tripped_count: 0,
        }
    }

    fn prune(&mut self, now: DateTime<Utc>, window: ChronoDuration) {
        while let Some(first) = self.events.front() {
            if now - *first > window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn count(&self) -> u32 {
        (self.events.len() as u32).max(self.tripped_count)
    }
}

pub struct CircuitBreaker {
    states: RwLock<HashMap<BreakerCategory, CategoryState>>,
    thresholds: HashMap<BreakerCategory, u32>,
    window: ChronoDuration,
    alerts: AlertBus,
}

impl CircuitBreaker {
    pub fn new(window: Duration, alerts: AlertBus) -> Self {
        let thresholds = BreakerCategory::ALL
            .iter()
            .map(|c| (*c, c.default_threshold()))
            .collect();
        Self {
            states: RwLock::new(HashMap::new()),
            thresholds,
            window: ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::hours(1)),
            alerts,
        }
    }

    pub fn with_threshold(mut self, category: BreakerCategory, threshold: u32) -> Self {
        self.thresholds.insert(category, threshold);
        self
    }

    fn threshold_for(&self, category: BreakerCategory) -> u32 {
        self.thresholds
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_threshold())
    }

    /// Counts one adverse event. Returns true when this event activated the category.
    pub async fn record_event(&self, category: BreakerCategory, reason: &str) -> bool {
        let now = Utc::now();
        let threshold = self.threshold_for(category);
        let mut states = self.states.write().await;
        let state = states
            .entry(category)
            .or_insert_with(|| CategoryState::new(threshold));

        state.prune(now, self.window);
        state.events.push_back(now);

        let count = state.events.len() as u32;
        if state.active || count <= state.threshold {
            return false;
        }

        let reason = format!("{reason} ({count} events > {})", state.threshold);
        Self::activate(state, &reason, now);
        let alert = Alert::CircuitBreakerActivated {
            category,
            reason,
            count,
            threshold: state.threshold,
            at: now,
        };
        drop(states);
        self.alerts.publish(alert);
        true
    }

    /// Activates a category directly from an externally maintained counter.
    pub async fn trip(&self, category: BreakerCategory, reason: &str, count: u32, threshold: u32) -> bool {
        let now = Utc::now();
        let mut states = self.states.write().await;
        let state = states
            .entry(category)
            .or_insert_with(|| CategoryState::new(threshold));
        state.threshold = threshold;
        state.tripped_count = state.tripped_count.max(count);
        if state.active {
            return false;
        }

        Self::activate(state, reason, now);
        drop(states);
        self.alerts.publish(Alert::CircuitBreakerActivated {
            category,
            reason: reason.to_string(),
            count,
            threshold,
            at: now,
        });
        true
    }

    fn activate(state: &mut CategoryState, reason: &str, now: DateTime<Utc>) {
        state.active = true;
        state.reason = Some(reason.to_string());
        state.activated_at = Some(now);
        warn!(reason, "⚡ Circuit breaker ACTIVE");
    }

    pub async fn is_active(&self, category: BreakerCategory) -> bool {
        self.states
            .read()
            .await
            .get(&category)
            .map(|s| s.active)
            .unwrap_or(false)
    }

    /// First active category, if any. Any active category blocks new executions.
    pub async fn blocking_state(&self) -> Option<BreakerState> {
        self.states()
            .await
            .into_iter()
            .find(|s| s.active)
    }

    pub async fn can_proceed(&self) -> bool {
        self.blocking_state().await.is_none()
    }

    /// Manual operator reset. Clears the counter and the activation.
    pub async fn reset(&self, category: BreakerCategory) -> bool {
        let mut states = self.states.write().await;
        match states.remove(&category) {
            Some(state) => {
                info!(category = %category, was_active = state.active, "Circuit breaker reset by operator");
                state.active
            }
            None => false,
        }
    }

    pub async fn state(&self, category: BreakerCategory) -> BreakerState {
        let states = self.states.read().await;
        match states.get(&category) {
            Some(s) => BreakerState {
                category,
                count: s.count(),
                threshold: s.threshold,
                active: s.active,
                reason: s.reason.clone(),
                activated_at: s.activated_at,
            },
            None => BreakerState {
                category,
                count: 0,
                threshold: self.threshold_for(category),
                active: false,
                reason: None,
                activated_at: None,
            },
        }
    }

    pub async fn states(&self) -> Vec<BreakerState> {
        let mut out = Vec::with_capacity(BreakerCategory::ALL.len());
        for category in BreakerCategory::ALL {
            out.push(self.state(category).await);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(Duration::from_secs(3600), AlertBus::default())
    }

    #[tokio::test]
    async fn trips_only_after_threshold_is_exceeded() {
        let breaker = breaker();
        for _ in 0..5 {
            assert!(!breaker.record_event(BreakerCategory::OrderTimeout, "timeout").await);
        }
        assert!(!breaker.is_active(BreakerCategory::OrderTimeout).await);

        assert!(breaker.record_event(BreakerCategory::OrderTimeout, "timeout").await);
        let state = breaker.state(BreakerCategory::OrderTimeout).await;
        assert!(state.active);
        assert_eq!(state.count, 6);
        assert_eq!(state.threshold, 5);
    }

    #[tokio::test]
    async fn never_self_clears() {
        let breaker = breaker();
        breaker.trip(BreakerCategory::LargeLoss, "loss", 4, 3).await;
        for _ in 0..3 {
            breaker.record_event(BreakerCategory::LargeLoss, "loss").await;
        }
        assert!(breaker.is_active(BreakerCategory::LargeLoss).await);
        assert!(!breaker.can_proceed().await);

        assert!(breaker.reset(BreakerCategory::LargeLoss).await);
        assert!(breaker.can_proceed().await);
        assert_eq!(breaker.state(BreakerCategory::LargeLoss).await.count, 0);
    }

    #[tokio::test]
    async fn activation_publishes_alert() {
        let alerts = AlertBus::default();
        let mut rx = alerts.subscribe();
        let breaker = CircuitBreaker::new(Duration::from_secs(60), alerts);

        breaker.record_event(BreakerCategory::UnhedgedPosition, "buy leg failed").await;

        match rx.try_recv() {
            Ok(Alert::CircuitBreakerActivated { category, .. }) => {
                assert_eq!(category, BreakerCategory::UnhedgedPosition)
            }
            other => panic!("unexpected alert: {other:?}"),
        }
    }
}
