//! Origin pool bookkeeping and load balancing.
//!
//! The [`BackendRegistry`] owns the fixed origin set and one availability
//! bit per origin. Balancers select among currently-available origins only;
//! strategies share the registry and differ solely in how they pick.

use crate::models::backend::Backend;
use crate::models::settings::BalancerStrategy;
use crate::services::circuit_breaker::{BreakerEventSink, BreakerTransition, CircuitState};
use ahash::AHashMap;
use log::{info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Selection failed because every origin is currently marked unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no available backend")]
pub struct NoAvailableBackend;

/// The origin set plus one mutable availability bit per origin.
///
/// Origins themselves are immutable after construction. The bits start
/// `true` and are flipped by the forwarders and the breaker wiring; no
/// background prober exists, so whoever clears a bit is responsible for
/// arranging its recovery.
#[derive(Debug)]
pub struct BackendRegistry {
    backends: Vec<Backend>,
    availability: AHashMap<String, AtomicBool>,
}

impl BackendRegistry {
    pub fn new(backends: Vec<Backend>) -> Self {
        let availability = backends
            .iter()
            .map(|b| (b.id.clone(), AtomicBool::new(true)))
            .collect();
        Self {
            backends,
            availability,
        }
    }

    /// Clears the availability bit for an origin. Unknown ids are ignored.
    pub fn mark_failed(&self, id: &str) {
        if let Some(bit) = self.availability.get(id) {
            if bit.swap(false, Ordering::Relaxed) {
                warn!("Backend {} marked unavailable", id);
            }
        }
    }

    /// Restores the availability bit for an origin. Unknown ids are ignored.
    pub fn mark_available(&self, id: &str) {
        if let Some(bit) = self.availability.get(id) {
            if !bit.swap(true, Ordering::Relaxed) {
                info!("Backend {} marked available", id);
            }
        }
    }

    pub fn is_available(&self, id: &str) -> bool {
        self.availability
            .get(id)
            .map(|bit| bit.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Snapshot of the currently-available origins, in configuration order.
    ///
    /// The snapshot is taken at call time; the set may shrink or grow
    /// before the caller acts on it, which selection tolerates.
    pub fn available(&self) -> Vec<Backend> {
        self.backends
            .iter()
            .filter(|b| self.is_available(&b.id))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> &[Backend] {
        &self.backends
    }
}

/// Load balancer contract shared by all strategies.
///
/// `select` observes only origins whose availability bit is set and fails
/// with [`NoAvailableBackend`] when that set is empty. All operations are
/// safe under arbitrary concurrent callers and never block on each other.
pub trait LoadBalancer: Send + Sync {
    /// Picks an available origin for one request.
    fn select(&self) -> Result<Backend, NoAvailableBackend>;

    /// Removes an origin from selection.
    fn mark_failed(&self, id: &str);

    /// Returns an origin to selection.
    fn mark_available(&self, id: &str);

    /// Snapshot of the origins currently eligible for selection.
    fn available_set(&self) -> Vec<Backend>;
}

/// Counter value at which round-robin restarts from zero, kept well below
/// `usize::MAX` so the increment itself can never wrap.
const COUNTER_RESET_AT: usize = usize::MAX - (1 << 16);

/// Round-robin balancer.
///
/// A monotonic counter advanced once per call, taken modulo the size of the
/// availability snapshot. Over any window in which the available set is
/// stable, every origin is picked an equal number of times, give or take
/// one.
#[derive(Debug)]
pub struct RoundRobinBalancer {
    registry: Arc<BackendRegistry>,
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            counter: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(&self) -> Result<Backend, NoAvailableBackend> {
        let available = self.registry.available();
        if available.is_empty() {
            return Err(NoAvailableBackend);
        }

        let ticket = self.counter.fetch_add(1, Ordering::Relaxed);
        if ticket >= COUNTER_RESET_AT {
            // Racing resets are fine, any of them lands the counter near 0.
            let _ = self.counter.compare_exchange(
                ticket + 1,
                0,
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
        }

        Ok(available[ticket % available.len()].clone())
    }

    fn mark_failed(&self, id: &str) {
        self.registry.mark_failed(id);
    }

    fn mark_available(&self, id: &str) {
        self.registry.mark_available(id);
    }

    fn available_set(&self) -> Vec<Backend> {
        self.registry.available()
    }
}

/// Random balancer.
///
/// Uniform choice over the availability snapshot from a small
/// non-cryptographic generator seeded once at construction.
pub struct RandomBalancer {
    registry: Arc<BackendRegistry>,
    rng: Mutex<SmallRng>,
}

impl RandomBalancer {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            rng: Mutex::new(SmallRng::from_entropy()),
        }
    }
}

impl LoadBalancer for RandomBalancer {
    fn select(&self) -> Result<Backend, NoAvailableBackend> {
        let available = self.registry.available();
        if available.is_empty() {
            return Err(NoAvailableBackend);
        }

        let index = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.gen_range(0..available.len())
        };
        Ok(available[index].clone())
    }

    fn mark_failed(&self, id: &str) {
        self.registry.mark_failed(id);
    }

    fn mark_available(&self, id: &str) {
        self.registry.mark_available(id);
    }

    fn available_set(&self) -> Vec<Backend> {
        self.registry.available()
    }
}

/// Factory for creating a balancer from the configured strategy.
pub struct LoadBalancerFactory;

impl LoadBalancerFactory {
    /// Creates a balancer over the given registry.
    ///
    /// Strategies that are accepted by the configuration parser but not
    /// implemented are refused here rather than silently replaced.
    pub fn create(
        strategy: BalancerStrategy,
        registry: Arc<BackendRegistry>,
    ) -> Result<Arc<dyn LoadBalancer>, String> {
        match strategy {
            BalancerStrategy::RoundRobin => Ok(Arc::new(RoundRobinBalancer::new(registry))),
            BalancerStrategy::Random => Ok(Arc::new(RandomBalancer::new(registry))),
            BalancerStrategy::Weighted | BalancerStrategy::LeastConnections => Err(format!(
                "Load balancing strategy {:?} is not implemented",
                strategy
            )),
        }
    }
}

/// Keeps availability bits in step with circuit breaker transitions.
///
/// When a breaker opens, the origin is removed from selection and a timed
/// task restores it after the open dwell so the next request can be routed
/// there and serve as the half-open probe. A breaker closing restores the
/// origin immediately.
pub struct AvailabilityBridge {
    balancer: Arc<dyn LoadBalancer>,
    reopen_after: Duration,
}

impl AvailabilityBridge {
    pub fn new(balancer: Arc<dyn LoadBalancer>, reopen_after: Duration) -> Self {
        Self {
            balancer,
            reopen_after,
        }
    }
}

impl BreakerEventSink for AvailabilityBridge {
    fn on_transition(&self, transition: &BreakerTransition) {
        match transition.to {
            CircuitState::Open => {
                self.balancer.mark_failed(&transition.backend);

                let balancer = Arc::clone(&self.balancer);
                let id = transition.backend.clone();
                let delay = self.reopen_after;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    balancer.mark_available(&id);
                });
            }
            CircuitState::Closed => {
                self.balancer.mark_available(&transition.backend);
            }
            CircuitState::HalfOpen => {}
        }
    }
}
