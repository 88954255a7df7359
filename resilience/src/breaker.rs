//! Per-dependency circuit breakers.
//!
//! Breaker state lives only in memory; a restart closes every breaker and the
//! ledger's attempt history carries recovery instead.

use std::sync::Arc;
use std::time::Duration;

use capture_core::BreakerState;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// A state change, returned so callers can publish it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerTransition {
    pub from: BreakerState,
    pub to: BreakerState
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool
}

/// `closed → open` after `threshold` consecutive failures, `open → half_open`
/// once the cooldown has elapsed, then a single probe decides.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    cooldown: Duration,
    inner: Mutex<BreakerInner>
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false
            })
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Asks to place a call. `Err` means the call must not be made.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open and lets
    /// exactly one probe through until that probe reports back.
    pub fn try_acquire(&self) -> Result<Option<BreakerTransition>, BreakerState> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(None),
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.cooldown);
                if !cooled {
                    return Err(BreakerState::Open);
                }
                inner.state = BreakerState::HalfOpen;
                inner.probe_in_flight = true;
                info!(dependency = %self.name, "Circuit breaker half-open, probing");
                Ok(Some(BreakerTransition {
                    from: BreakerState::Open,
                    to: BreakerState::HalfOpen
                }))
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(BreakerState::HalfOpen)
                } else {
                    inner.probe_in_flight = true;
                    Ok(None)
                }
            }
        }
    }

    pub fn record_success(&self) -> Option<BreakerTransition> {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.opened_at = None;
                info!(dependency = %self.name, "Circuit breaker closed after successful probe");
                Some(BreakerTransition {
                    from: BreakerState::HalfOpen,
                    to: BreakerState::Closed
                })
            }
            BreakerState::Closed | BreakerState::Open => None
        }
    }

    pub fn record_failure(&self, threshold: u32) -> Option<BreakerTransition> {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.probe_in_flight = false;
        match inner.state {
            BreakerState::Closed if inner.consecutive_failures >= threshold.max(1) => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(
                    dependency = %self.name,
                    failures = inner.consecutive_failures,
                    "Circuit breaker opened"
                );
                Some(BreakerTransition {
                    from: BreakerState::Closed,
                    to: BreakerState::Open
                })
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(dependency = %self.name, "Circuit breaker re-opened after failed probe");
                Some(BreakerTransition {
                    from: BreakerState::HalfOpen,
                    to: BreakerState::Open
                })
            }
            BreakerState::Closed | BreakerState::Open => None
        }
    }

    /// Ends a call whose failure is not held against the dependency. A
    /// half-open breaker stays half-open and admits the next probe.
    pub fn release_probe(&self) {
        self.inner.lock().probe_in_flight = false;
    }

    /// Opens regardless of the failure count and restarts the cooldown.
    pub fn force_open(&self) -> Option<BreakerTransition> {
        let mut inner = self.inner.lock();
        let from = inner.state;
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_in_flight = false;
        warn!(dependency = %self.name, "Circuit breaker forced open");
        (from != BreakerState::Open).then_some(BreakerTransition {
            from,
            to: BreakerState::Open
        })
    }

    fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }
}

/// Owns one breaker per dependency key. Cloning shares the same breakers.
#[derive(Debug, Clone)]
pub struct CircuitRegistry {
    cooldown: Duration,
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>
}

impl CircuitRegistry {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            breakers: Arc::new(DashMap::new())
        }
    }

    pub fn get(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(dependency) {
            return Arc::clone(breaker.value());
        }
        Arc::clone(
            self.breakers
                .entry(dependency.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(dependency, self.cooldown)))
                .value()
        )
    }

    pub fn state(&self, dependency: &str) -> BreakerState {
        self.breakers
            .get(dependency)
            .map_or(BreakerState::Closed, |breaker| breaker.state())
    }

    pub fn force_open(&self, dependency: &str) -> Option<BreakerTransition> {
        self.get(dependency).force_open()
    }

    /// Closes every breaker.
    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    pub fn snapshot(&self) -> Vec<(String, BreakerState)> {
        let mut states: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_exactly_threshold_failures_open() {
        let breaker = CircuitBreaker::new("mail_api", COOLDOWN);

        assert!(breaker.record_failure(3).is_none());
        assert!(breaker.record_failure(3).is_none());
        assert_eq!(breaker.state(), BreakerState::Closed);

        let transition = breaker.record_failure(3).unwrap();
        assert_eq!(transition.to, BreakerState::Open);
        assert_eq!(breaker.try_acquire(), Err(BreakerState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("mail_api", COOLDOWN);
        breaker.record_failure(3);
        breaker.record_failure(3);
        breaker.record_success();
        breaker.record_failure(3);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_cooldown_allows_one_probe() {
        let breaker = CircuitBreaker::new("cloud_files", COOLDOWN);
        breaker.record_failure(1);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        let transition = breaker.try_acquire().unwrap().unwrap();
        assert_eq!(transition.to, BreakerState::HalfOpen);
        assert_eq!(breaker.try_acquire(), Err(BreakerState::HalfOpen));

        let closed = breaker.record_success().unwrap();
        assert_eq!(closed.to, BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert_eq!(breaker.try_acquire(), Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens_and_restarts_cooldown() {
        let breaker = CircuitBreaker::new("transcriber", COOLDOWN);
        breaker.record_failure(1);
        tokio::time::advance(COOLDOWN).await;
        breaker.try_acquire().unwrap();

        let reopened = breaker.record_failure(1).unwrap();
        assert_eq!(reopened.from, BreakerState::HalfOpen);
        assert_eq!(reopened.to, BreakerState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(breaker.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_probe_admits_next_probe() {
        let breaker = CircuitBreaker::new("mail_api", COOLDOWN);
        breaker.record_failure(1);
        tokio::time::advance(COOLDOWN).await;
        breaker.try_acquire().unwrap();

        breaker.release_probe();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert_eq!(breaker.consecutive_failures(), 1);
        assert_eq!(breaker.try_acquire(), Ok(None));
        assert_eq!(breaker.try_acquire(), Err(BreakerState::HalfOpen));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_breakers_are_independent() {
        let registry = CircuitRegistry::new(COOLDOWN);
        registry.force_open("mail_api");

        assert_eq!(registry.state("mail_api"), BreakerState::Open);
        assert_eq!(registry.state("cloud_files"), BreakerState::Closed);
        assert!(registry.get("cloud_files").try_acquire().is_ok());

        registry.reset_all();
        assert_eq!(registry.state("mail_api"), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_clone_shares_state() {
        let registry = CircuitRegistry::new(COOLDOWN);
        let handle = registry.clone();
        handle.get("vault").record_failure(1);
        assert_eq!(registry.state("vault"), BreakerState::Open);
        assert_eq!(registry.snapshot(), vec![("vault".to_string(), BreakerState::Open)]);
    }
}
