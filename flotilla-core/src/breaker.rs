//! Per-target circuit breaker
//!
//! Tracks consecutive call failures against a downstream target and stops
//! issuing calls for a cooldown period once a threshold is crossed. This is
//! call-level protection, independent of whatever health the target reports
//! about itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow through normally
    Closed,
    /// Calls fail fast until the open timeout elapses
    Open,
    /// One trial call is admitted to test recovery
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker tuning
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a trial call
    pub open_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
        }
    }
}

/// Error returned by [`CircuitBreaker::call`]
///
/// The breaker never swallows the underlying error; a failed call always
/// surfaces it as `Inner`. `Open` means the call was rejected without being
/// attempted at all.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker for '{target}' is open")]
    Open { target: String },

    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// The underlying error, if the call was actually attempted
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Open { .. } => None,
            Self::Inner(err) => Some(err),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    /// A half-open trial call is currently in flight
    trial_in_flight: bool,
}

/// Failure-counting state machine for a single downstream target.
///
/// States move `Closed -> Open -> HalfOpen -> Closed`. The half-open state
/// admits exactly one trial call; concurrent callers are rejected as open
/// until the trial resolves.
pub struct CircuitBreaker {
    target: String,
    failure_threshold: u32,
    open_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(target: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            target: target.into(),
            failure_threshold: config.failure_threshold,
            open_timeout: config.open_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Target name this breaker guards
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Current state as last observed by a call
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Consecutive failures recorded so far
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Run `op` through the breaker.
    ///
    /// Rejected calls return [`BreakerError::Open`] without invoking `op`;
    /// failed calls record the failure and return the original error as
    /// [`BreakerError::Inner`].
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, E>>,
    {
        if !self.try_admit() {
            return Err(BreakerError::Open {
                target: self.target.clone(),
            });
        }

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn try_admit(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled_down = inner
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.open_timeout);
                if cooled_down {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::info!(
                        breaker = %self.target,
                        "Circuit breaker half-open, admitting trial call"
                    );
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        let was_open = inner.state != BreakerState::Closed;
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
        if was_open {
            tracing::info!(breaker = %self.target, "Circuit breaker closed after successful call");
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.trial_in_flight = false;
        if inner.failure_count >= self.failure_threshold && inner.state != BreakerState::Open {
            inner.state = BreakerState::Open;
            tracing::warn!(
                breaker = %self.target,
                consecutive_failures = inner.failure_count,
                "Circuit breaker opened"
            );
        }
    }
}

/// Lazily-created circuit breakers keyed by downstream target name.
///
/// All breakers share one configuration; callers hold the returned `Arc` for
/// the duration of a call sequence.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: BreakerConfig,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Get or create the breaker for a target
    #[must_use]
    pub fn breaker(&self, target: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(target, self.config.clone())))
            .clone()
    }

    /// Snapshot of every known breaker's state (for diagnostics)
    #[must_use]
    pub fn states(&self) -> HashMap<String, BreakerState> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
