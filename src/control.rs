// Control plane: admission control and circuit breakers
//
// Bounds the number of trades in flight and their arrival rate, and keeps a
// per-backend circuit breaker with sliding-window failure tracking so a
// failing DEX stops being queried for a cooldown period.

use crate::errors::TradeError;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct AdmissionControl {
    max_inflight: Arc<Semaphore>,
    // Sliding 1s window of admitted request timestamps
    inner: Arc<Mutex<RateLimiter>>,
}

#[derive(Debug)]
struct RateLimiter {
    rate_per_sec: u32,
    timestamps: VecDeque<Instant>,
    window: Duration,
}

impl AdmissionControl {
    pub fn new(max_inflight: usize, rate_per_sec: Option<u32>) -> Self {
        let rl = RateLimiter {
            rate_per_sec: rate_per_sec.unwrap_or(200),
            timestamps: VecDeque::with_capacity(256),
            window: Duration::from_secs(1),
        };
        Self {
            max_inflight: Arc::new(Semaphore::new(max_inflight)),
            inner: Arc::new(Mutex::new(rl)),
        }
    }

    /// Admit one trade or reject it with `Overloaded`; never waits.
    pub async fn try_acquire(&self) -> Result<AdmissionPermit, TradeError> {
        let permit = self
            .max_inflight
            .clone()
            .try_acquire_owned()
            .map_err(|_| TradeError::Overloaded)?;

        let mut guard = self.inner.lock().await;
        let now = Instant::now();
        while let Some(front) = guard.timestamps.front() {
            if now.duration_since(*front) >= guard.window {
                guard.timestamps.pop_front();
            } else {
                break;
            }
        }
        if guard.timestamps.len() as u32 >= guard.rate_per_sec {
            debug!(rate_per_sec = guard.rate_per_sec, "admission rate limited");
            return Err(TradeError::Overloaded);
        }
        guard.timestamps.push_back(now);
        Ok(AdmissionPermit { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.max_inflight.available_permits()
    }
}

#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Breaker tuning shared by every backend.
#[derive(Debug, Clone, Copy)]
pub struct BreakerPolicy {
    pub max_window: usize,
    pub threshold: f32,
    pub min_samples: usize,
    pub open_cooldown: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            max_window: 100,
            threshold: 0.5,
            min_samples: 20,
            open_cooldown: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CircuitBreakers {
    policy: BreakerPolicy,
    inner: Arc<Mutex<HashMap<String, Breaker>>>,
}

#[derive(Debug, Clone)]
struct Breaker {
    window: VecDeque<bool>, // true=failure, false=success
    open_until: Option<Instant>,
}

impl Breaker {
    fn new(policy: &BreakerPolicy) -> Self {
        Self {
            window: VecDeque::with_capacity(policy.max_window),
            open_until: None,
        }
    }
}

impl CircuitBreakers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn is_open(&self, class: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let b = inner
            .entry(class.to_string())
            .or_insert_with(|| Breaker::new(&self.policy));
        if let Some(until) = b.open_until {
            if Instant::now() < until {
                return true;
            }
            // Half-open: start over with a clean window
            b.open_until = None;
            b.window.clear();
        }
        false
    }

    pub async fn record_success(&self, class: &str) {
        self.record(class, false).await;
    }

    pub async fn record_failure(&self, class: &str) {
        self.record(class, true).await;
    }

    async fn record(&self, class: &str, failure: bool) {
        let mut inner = self.inner.lock().await;
        let b = inner
            .entry(class.to_string())
            .or_insert_with(|| Breaker::new(&self.policy));
        if b.window.len() == self.policy.max_window {
            b.window.pop_front();
        }
        b.window.push_back(failure);

        let samples = b.window.len();
        if samples >= self.policy.min_samples {
            let fails = b.window.iter().filter(|x| **x).count();
            let rate = fails as f32 / samples as f32;
            if rate >= self.policy.threshold && b.open_until.is_none() {
                b.open_until = Some(Instant::now() + self.policy.open_cooldown);
                warn!(backend = %class, rate = rate, samples = samples, "circuit opened");
            }
        }
    }

    /// Backends whose breaker is currently open.
    pub async fn open_classes(&self) -> Vec<String> {
        let now = Instant::now();
        let inner = self.inner.lock().await;
        let mut open: Vec<String> = inner
            .iter()
            .filter(|(_, b)| b.open_until.is_some_and(|until| now < until))
            .map(|(class, _)| class.clone())
            .collect();
        open.sort();
        open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight() -> BreakerPolicy {
        BreakerPolicy {
            max_window: 10,
            threshold: 0.5,
            min_samples: 4,
            open_cooldown: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn inflight_limit_rejects_instead_of_waiting() {
        let admission = AdmissionControl::new(1, None);
        let first = admission.try_acquire().await.unwrap();
        assert_eq!(admission.try_acquire().await.unwrap_err(), TradeError::Overloaded);
        drop(first);
        assert!(admission.try_acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_resets_after_window() {
        let admission = AdmissionControl::new(10, Some(2));
        drop(admission.try_acquire().await.unwrap());
        drop(admission.try_acquire().await.unwrap());
        assert!(admission.try_acquire().await.is_err());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(admission.try_acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_on_failure_rate_and_recovers() {
        let breakers = CircuitBreakers::with_policy(tight());
        breakers.record_success("dedust").await;
        for _ in 0..3 {
            breakers.record_failure("dedust").await;
        }
        assert!(breakers.is_open("dedust").await);
        assert!(!breakers.is_open("stonfi").await);
        assert_eq!(breakers.open_classes().await, vec!["dedust".to_string()]);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!breakers.is_open("dedust").await);
        breakers.record_failure("dedust").await;
        assert!(!breakers.is_open("dedust").await);
    }

    #[tokio::test]
    async fn breaker_needs_min_samples() {
        let breakers = CircuitBreakers::with_policy(tight());
        for _ in 0..3 {
            breakers.record_failure("stonfi").await;
        }
        assert!(!breakers.is_open("stonfi").await);
    }
}
