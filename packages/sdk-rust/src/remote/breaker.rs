//! Per-service circuit breaker over a rolling window of call outcomes.
//!
//! Closed (calls flow) -> Open (fail fast) after enough failures in the
//! window; Open -> HalfOpen once the cool-down elapses, admitting a limited
//! number of probes; HalfOpen -> Closed after the probes succeed, or back to
//! Open on the first probe failure.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::service::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// `(at, failed)` for every call in the window, oldest first.
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    /// Bumped on every transition to Open; probes of an earlier half-open
    /// round no longer count.
    epoch: u64,
    probes_in_flight: u32,
    probe_successes: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

/// One admitted call. Resolve it with [`succeeded`](Self::succeeded) or
/// [`failed`](Self::failed); a permit dropped unresolved gives its probe
/// slot back, so an abandoned call never wedges the breaker half-open.
#[derive(Debug)]
#[must_use = "an unresolved permit records no outcome"]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    /// `Some(epoch)` when admitted as a half-open probe.
    probe: Option<u64>,
    resolved: bool,
}

impl BreakerPermit {
    pub fn succeeded(mut self) {
        self.resolved = true;
        self.breaker.record(self.probe, false);
    }

    pub fn failed(mut self) {
        self.resolved = true;
        self.breaker.record(self.probe, true);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.release(self.probe);
        }
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                epoch: 0,
                probes_in_flight: 0,
                probe_successes: 0,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Admits a call, or `None` while the breaker fails fast.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BreakerPermit> {
        let mut inner = self.inner.lock();
        let probe = match inner.state {
            CircuitState::Closed => None,
            CircuitState::Open => {
                let cool_down = Duration::from_millis(self.config.cool_down_ms);
                let cooled = inner.opened_at.is_none_or(|at| at.elapsed() >= cool_down);
                if !cooled {
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                inner.probes_in_flight = 1;
                inner.probe_successes = 0;
                info!(service = %self.name, "circuit breaker half-open, probing");
                Some(inner.epoch)
            }
            CircuitState::HalfOpen => {
                if inner.probes_in_flight + inner.probe_successes >= self.config.half_open_probes.max(1) {
                    return None;
                }
                inner.probes_in_flight += 1;
                Some(inner.epoch)
            }
        };
        Some(BreakerPermit {
            breaker: Arc::clone(self),
            probe,
            resolved: false,
        })
    }

    fn record(&self, probe: Option<u64>, failed: bool) {
        let mut inner = self.inner.lock();
        match (inner.state, probe) {
            (CircuitState::Closed, _) => {
                self.push(&mut inner, failed);
                if failed && self.should_open(&inner.window) {
                    Self::open(&mut inner);
                    warn!(service = %self.name, "circuit breaker opened");
                }
            }
            (CircuitState::HalfOpen, Some(epoch)) if epoch == inner.epoch => {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                if failed {
                    Self::open(&mut inner);
                    warn!(service = %self.name, "circuit breaker probe failed, reopened");
                    return;
                }
                inner.probe_successes += 1;
                if inner.probe_successes >= self.config.half_open_probes.max(1) {
                    inner.state = CircuitState::Closed;
                    inner.window.clear();
                    inner.opened_at = None;
                    info!(service = %self.name, "circuit breaker closed");
                }
            }
            // Admitted before the breaker opened, or a probe of an earlier round.
            _ => {}
        }
    }

    fn release(&self, probe: Option<u64>) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && probe == Some(inner.epoch) {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
            debug!(service = %self.name, "circuit breaker probe abandoned");
        }
    }

    fn push(&self, inner: &mut Inner, failed: bool) {
        let now = Instant::now();
        let window = Duration::from_millis(self.config.window_ms);
        while inner
            .window
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > window)
        {
            inner.window.pop_front();
        }
        inner.window.push_back((now, failed));
    }

    /// Enough calls, enough failures, and a high enough failure ratio.
    fn should_open(&self, window: &VecDeque<(Instant, bool)>) -> bool {
        let total = window.len();
        let failures = window.iter().filter(|(_, failed)| *failed).count();
        if total < self.config.min_requests as usize || failures < self.config.error_threshold as usize {
            return false;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = failures as f64 / total as f64;
        ratio >= self.config.error_ratio
    }

    fn open(inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.epoch += 1;
        inner.probes_in_flight = 0;
        inner.probe_successes = 0;
        inner.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BreakerConfig {
        BreakerConfig {
            window_ms: 1_000,
            min_requests: 4,
            error_threshold: 3,
            error_ratio: 0.5,
            cool_down_ms: 500,
            half_open_probes: 1,
        }
    }

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new("billing", config()))
    }

    fn fail(breaker: &Arc<CircuitBreaker>, n: usize) {
        for _ in 0..n {
            breaker.try_acquire().unwrap().failed();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_ratio() {
        let breaker = breaker();
        fail(&breaker, 3);
        assert_eq!(breaker.state(), CircuitState::Closed, "below min_requests");

        fail(&breaker, 1);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ratio_keeps_breaker_closed() {
        let breaker = breaker();
        for _ in 0..6 {
            breaker.try_acquire().unwrap().succeeded();
        }
        fail(&breaker, 3);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn old_outcomes_leave_the_window() {
        let breaker = breaker();
        fail(&breaker, 3);
        tokio::time::advance(Duration::from_millis(1_500)).await;
        fail(&breaker, 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_closes_or_reopens() {
        let breaker = breaker();
        fail(&breaker, 4);
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(600)).await;
        let probe = breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire().is_none(), "one probe at a time");
        probe.failed();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_none());

        tokio::time::advance(Duration::from_millis(600)).await;
        breaker.try_acquire().unwrap().succeeded();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_frees_its_slot() {
        let breaker = breaker();
        fail(&breaker, 4);
        tokio::time::advance(Duration::from_millis(600)).await;

        drop(breaker.try_acquire().unwrap());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.try_acquire().expect("slot released").succeeded();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_permits_do_not_count_as_probes() {
        let breaker = breaker();
        let early = breaker.try_acquire().unwrap();
        fail(&breaker, 4);
        tokio::time::advance(Duration::from_millis(600)).await;
        let probe = breaker.try_acquire().unwrap();

        early.succeeded();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        probe.succeeded();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
