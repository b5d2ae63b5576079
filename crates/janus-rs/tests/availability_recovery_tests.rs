//! Tests for the coupling between breaker transitions and availability
//! bits: an opening breaker removes its origin from selection and a timed
//! task restores it once the open dwell has passed, so the next request
//! can be routed there as the half-open probe.

use janus_rs::models::backend::Backend;
use janus_rs::services::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, FanoutSink,
};
use janus_rs::services::load_balancer::{
    AvailabilityBridge, BackendRegistry, LoadBalancer, RoundRobinBalancer,
};
use std::sync::Arc;
use std::time::Duration;

fn setup(
    open_ms: u64,
    threshold: u64,
) -> (Arc<dyn LoadBalancer>, CircuitBreakerRegistry) {
    let registry = Arc::new(BackendRegistry::new(vec![Backend {
        id: "b1".to_string(),
        url: "http://127.0.0.1:9001".to_string(),
        weight: 1,
        health_check_path: None,
    }]));
    let balancer: Arc<dyn LoadBalancer> = Arc::new(RoundRobinBalancer::new(registry));

    let bridge = Arc::new(AvailabilityBridge::new(
        Arc::clone(&balancer),
        Duration::from_millis(open_ms),
    ));
    let breakers = CircuitBreakerRegistry::new(
        CircuitBreakerConfig {
            failure_threshold: threshold,
            open_duration: Duration::from_millis(open_ms),
        },
        Arc::new(FanoutSink::new(vec![bridge])),
    );

    (balancer, breakers)
}

#[tokio::test]
async fn opening_removes_the_origin_and_the_dwell_restores_it() {
    let (balancer, breakers) = setup(200, 3);
    let breaker = breakers.breaker("b1");

    for _ in 0..3 {
        breaker.record_failure();
    }
    assert_eq!(breaker.current_state(), CircuitState::Open);

    // Inside the dwell the origin is out of rotation.
    assert!(balancer.select().is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;

    // Back in rotation; the next caller through the breaker is the probe.
    let picked = balancer.select().unwrap();
    assert_eq!(picked.id, "b1");

    assert!(breaker.try_acquire().is_ok());
    assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

    breaker.record_success();
    assert_eq!(breaker.current_state(), CircuitState::Closed);
    assert!(balancer.select().is_ok());
}

#[tokio::test]
async fn failed_probe_takes_the_origin_out_again() {
    let (balancer, breakers) = setup(150, 1);
    let breaker = breakers.breaker("b1");

    breaker.record_failure();
    assert!(balancer.select().is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(balancer.select().is_ok());

    breaker.try_acquire().unwrap();
    breaker.record_failure();
    assert_eq!(breaker.current_state(), CircuitState::Open);
    assert!(balancer.select().is_err());

    // And the cycle repeats after another dwell.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(balancer.select().is_ok());
}
