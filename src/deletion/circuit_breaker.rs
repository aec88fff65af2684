use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

use crate::core::config::CircuitBreakerConfig;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub failures: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub state: CircuitState,
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError<E> {
    /// Breaker refused the call; the dependency was not invoked.
    Rejected,
    Failed(E),
}


struct Inner {
    state: CircuitState,
    failures: u32,
    last_failure_time: Option<DateTime<Utc>>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}


pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    timeout: Duration,
    inner: Mutex<Inner>,
    rejected_count: AtomicU64,
    open_count: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, threshold: u32, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure_time: None,
                opened_at: None,
                trial_in_flight: false,
            }),
            rejected_count: AtomicU64::new(0),
            open_count: AtomicU64::new(0),
        }
    }


    pub fn from_config(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::new(name, config.threshold, config.timeout())
    }


    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }


    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        CircuitBreakerState {
            failures: inner.failures,
            last_failure_time: inner.last_failure_time,
            state: inner.state,
        }
    }


    pub fn rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }


    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::Relaxed)
    }


    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        info!("Circuit breaker {} manually reset", self.name);
    }


    /// Runs `op` unless the breaker is open, or half-open with its single
    /// trial already in flight.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(trial) = self.try_acquire() else {
            self.rejected_count.fetch_add(1, Ordering::Relaxed);
            debug!("Circuit breaker {} rejected call", self.name);
            return Err(CallError::Rejected);
        };

        let mut guard = TrialGuard {
            breaker: self,
            trial,
            settled: false,
        };

        let outcome = op().await;
        guard.settled = true;

        match outcome {
            Ok(value) => {
                self.record_success(trial);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(trial);
                Err(CallError::Failed(err))
            }
        }
    }

    /// `Some(is_trial)` when the call may proceed.
    fn try_acquire(&self) -> Option<bool> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                let elapsed = inner.opened_at.is_none_or(|at| at.elapsed() >= self.timeout);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!("Circuit breaker {} half-open, admitting trial call", self.name);
                    Some(true)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(true)
                }
            }
        }
    }

    fn record_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen if trial => {
                inner.state = CircuitState::Closed;
                inner.failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                info!("Circuit breaker {} closed - dependency recovered", self.name);
            }
            CircuitState::Closed => {
                inner.failures = 0;
            }
            _ => {}
        }
    }

    fn record_failure(&self, trial: bool) {
        let mut inner = self.inner.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure_time = Some(Utc::now());

        match inner.state {
            CircuitState::Closed if inner.failures >= self.threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                self.open_count.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Circuit breaker {} opened after {} consecutive failures",
                    self.name, inner.failures
                );
            }
            CircuitState::HalfOpen if trial => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
                self.open_count.fetch_add(1, Ordering::Relaxed);
                warn!("Circuit breaker {} trial call failed, re-opening", self.name);
            }
            _ => {}
        }
    }
}


struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            debug!("Trial call on {} dropped before completing", self.breaker.name);
            self.breaker.record_failure(true);
        }
    }
}
