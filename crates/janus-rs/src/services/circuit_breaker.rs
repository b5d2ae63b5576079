//! Per-origin circuit breakers.
//!
//! One breaker guards each origin, keyed by origin id and created lazily on
//! first use. State transitions are compare-and-swap based so concurrent
//! callers can never skip or duplicate a step, and every transition is
//! published synchronously to the observer sink right after the swap
//! succeeds, giving observers a total order per origin.
//!
//! The breaker does not inspect HTTP. Callers decide what counts as a
//! failure and report outcomes through [`CircuitBreaker::record_success`]
//! and [`CircuitBreaker::record_failure`], or wrap a whole operation with
//! [`CircuitBreaker::call`].

use crate::models::settings::BreakerSettings;
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// State of a circuit breaker.
///
/// * `Closed` - normal operation, calls pass through
/// * `Open` - calls short-circuit until the dwell elapses
/// * `HalfOpen` - a probe is in flight, the next outcome decides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// A single observed state change, emitted atomically with the change
/// itself.
#[derive(Debug, Clone)]
pub struct BreakerTransition {
    pub backend: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

impl BreakerTransition {
    /// Stable name for counting, e.g. `closed_to_open`.
    pub fn name(&self) -> String {
        format!("{}_to_{}", self.from.as_str(), self.to.as_str())
    }
}

/// Receiver for breaker transitions.
pub trait BreakerEventSink: Send + Sync {
    fn on_transition(&self, transition: &BreakerTransition);
}

/// Fans a transition out to several sinks in order.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn BreakerEventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn BreakerEventSink>>) -> Self {
        Self { sinks }
    }
}

impl BreakerEventSink for FanoutSink {
    fn on_transition(&self, transition: &BreakerTransition) {
        for sink in &self.sinks {
            sink.on_transition(transition);
        }
    }
}

/// Breaker tuning, shared by every origin.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u64,
    /// Minimum dwell in the open state before a probe.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 50,
            open_duration: Duration::from_millis(60_000),
        }
    }
}

impl From<&BreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            open_duration: Duration::from_millis(settings.open_duration_ms),
        }
    }
}

/// The circuit is open and the call was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker is open")]
pub struct CircuitOpenError;

/// Errors produced by [`CircuitBreaker::call`].
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Circuit breaker for one origin.
///
/// State lives in an atomic byte; the consecutive-failure counter is an
/// atomic integer; the open timestamp sits behind a mutex that is only
/// taken around transitions, never across I/O.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU64,
    opened_at: Mutex<Option<Instant>>,
    sink: Arc<dyn BreakerEventSink>,
}

impl std::fmt::Debug for dyn BreakerEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BreakerEventSink")
    }
}

impl CircuitBreaker {
    pub fn new(
        name: String,
        config: CircuitBreakerConfig,
        sink: Arc<dyn BreakerEventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU64::new(0),
            opened_at: Mutex::new(None),
            sink,
        })
    }

    /// Admission check, run before dialing the origin.
    ///
    /// * `Closed` admits the call.
    /// * `Open` rejects until the dwell has elapsed; the first caller after
    ///   that wins a compare-and-swap to `HalfOpen` and proceeds as the
    ///   probe, racing losers keep observing the open circuit.
    /// * `HalfOpen` admits; a single trial at a time is not enforced.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        match self.current_state() {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = {
                    let slot = self.opened_at.lock().unwrap_or_else(|e| e.into_inner());
                    slot.map(|at| at.elapsed())
                };

                match elapsed {
                    Some(dwell) if dwell >= self.config.open_duration => {
                        if self.transition(CircuitState::Open, CircuitState::HalfOpen) {
                            debug!("Circuit breaker {} probing after open dwell", self.name);
                            Ok(())
                        } else {
                            Err(CircuitOpenError)
                        }
                    }
                    _ => Err(CircuitOpenError),
                }
            }
        }
    }

    /// Reports a successful exchange.
    pub fn record_success(&self) {
        match self.current_state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                if self.transition(CircuitState::HalfOpen, CircuitState::Closed) {
                    self.failure_count.store(0, Ordering::Relaxed);
                    info!("Circuit breaker {} closed, origin recovered", self.name);
                }
            }
            CircuitState::Open => {
                debug!("Late success reported to open circuit {}", self.name);
            }
        }
    }

    /// Reports a failed exchange.
    pub fn record_failure(&self) {
        match self.current_state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                if failures >= self.config.failure_threshold {
                    let mut slot = self.opened_at.lock().unwrap_or_else(|e| e.into_inner());
                    if self.transition(CircuitState::Closed, CircuitState::Open) {
                        *slot = Some(Instant::now());
                        warn!(
                            "Circuit breaker {} opened after {} consecutive failures",
                            self.name, failures
                        );
                    }
                }
            }
            CircuitState::HalfOpen => {
                let mut slot = self.opened_at.lock().unwrap_or_else(|e| e.into_inner());
                if self.transition(CircuitState::HalfOpen, CircuitState::Open) {
                    *slot = Some(Instant::now());
                    warn!("Circuit breaker {} reopened, probe failed", self.name);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Runs an operation under breaker protection.
    ///
    /// Convenience wrapper over [`try_acquire`](Self::try_acquire) and the
    /// record methods for callers whose success criterion is simply the
    /// operation's `Result`.
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        if self.try_acquire().is_err() {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match operation.await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(error) => {
                self.record_failure();
                Err(CircuitBreakerError::OperationFailed(error))
            }
        }
    }

    pub fn current_state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Single compare-and-swap step; publishes the transition on success.
    fn transition(&self, from: CircuitState, to: CircuitState) -> bool {
        let swapped = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if swapped {
            let transition = BreakerTransition {
                backend: self.name.clone(),
                from,
                to,
                at: Utc::now(),
            };
            debug!("Circuit breaker {} {}", self.name, transition.name());
            self.sink.on_transition(&transition);
        }

        swapped
    }
}

/// Lazily-populated map of breakers, one per origin id.
///
/// Entries live for the lifetime of the process; there is no eviction.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    sink: Arc<dyn BreakerEventSink>,
    breakers: RwLock<AHashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, sink: Arc<dyn BreakerEventSink>) -> Self {
        Self {
            config,
            sink,
            breakers: RwLock::new(AHashMap::new()),
        }
    }

    /// Returns the breaker for an origin, creating it on first use.
    pub fn breaker(&self, id: &str) -> Arc<CircuitBreaker> {
        {
            let map = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            if let Some(breaker) = map.get(id) {
                return Arc::clone(breaker);
            }
        }

        let mut map = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(id.to_string()).or_insert_with(|| {
            CircuitBreaker::new(
                id.to_string(),
                self.config.clone(),
                Arc::clone(&self.sink),
            )
        }))
    }

    /// Current state and failure count per origin, sorted by id for stable
    /// output.
    pub fn snapshot(&self) -> Vec<(String, CircuitState, u64)> {
        let map = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<_> = map
            .iter()
            .map(|(id, b)| (id.clone(), b.current_state(), b.failure_count()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
