//! Integration tests for origin pool bookkeeping and balancing.

use janus_rs::models::backend::Backend;
use janus_rs::models::settings::BalancerStrategy;
use janus_rs::services::load_balancer::{
    BackendRegistry, LoadBalancer, LoadBalancerFactory, NoAvailableBackend, RoundRobinBalancer,
};
use std::collections::HashMap;
use std::sync::Arc;

fn backend(id: &str, url: &str) -> Backend {
    Backend {
        id: id.to_string(),
        url: url.to_string(),
        weight: 1,
        health_check_path: None,
    }
}

fn pool(ids: &[&str]) -> Arc<BackendRegistry> {
    let backends = ids
        .iter()
        .enumerate()
        .map(|(i, id)| backend(id, &format!("http://127.0.0.1:{}", 9001 + i)))
        .collect();
    Arc::new(BackendRegistry::new(backends))
}

#[test]
fn backend_validation() {
    assert!(backend("b1", "http://localhost:8080").validate().is_ok());
    assert!(backend("b1", "localhost:8080").validate().is_err());
    assert!(backend("", "http://localhost:8080").validate().is_err());

    let mut zero_weight = backend("b1", "http://localhost:8080");
    zero_weight.weight = 0;
    assert!(zero_weight.validate().is_err());
}

#[test]
fn registry_starts_with_all_backends_available() {
    let registry = pool(&["b1", "b2", "b3"]);
    assert_eq!(registry.available().len(), 3);
    assert!(registry.is_available("b1"));
}

#[test]
fn marked_backend_is_never_selected_until_restored() {
    let registry = pool(&["b1", "b2", "b3"]);
    let balancer = RoundRobinBalancer::new(Arc::clone(&registry));

    balancer.mark_failed("b2");

    for _ in 0..50 {
        let picked = balancer.select().unwrap();
        assert_ne!(picked.id, "b2");
    }

    balancer.mark_available("b2");
    let mut seen_b2 = false;
    for _ in 0..10 {
        if balancer.select().unwrap().id == "b2" {
            seen_b2 = true;
        }
    }
    assert!(seen_b2);
}

#[test]
fn empty_available_set_fails_selection() {
    let registry = pool(&["b1", "b2"]);
    let balancer = RoundRobinBalancer::new(Arc::clone(&registry));

    balancer.mark_failed("b1");
    balancer.mark_failed("b2");

    assert_eq!(balancer.select(), Err(NoAvailableBackend));
    assert!(balancer.available_set().is_empty());
}

#[test]
fn round_robin_is_fair_over_a_stable_set() {
    let registry = pool(&["b1", "b2", "b3"]);
    let balancer = RoundRobinBalancer::new(registry);

    let mut counts: HashMap<String, usize> = HashMap::new();
    let calls = 90;
    for _ in 0..calls {
        let picked = balancer.select().unwrap();
        *counts.entry(picked.id).or_default() += 1;
    }

    // Each origin gets calls/3 picks, give or take one.
    for id in ["b1", "b2", "b3"] {
        let count = counts.get(id).copied().unwrap_or(0);
        assert!(
            (count as i64 - (calls / 3) as i64).abs() <= 1,
            "{} picked {} times out of {}",
            id,
            count,
            calls
        );
    }
}

#[test]
fn round_robin_adapts_to_a_shrinking_set() {
    let registry = pool(&["b1", "b2", "b3"]);
    let balancer = RoundRobinBalancer::new(registry);

    for _ in 0..5 {
        balancer.select().unwrap();
    }

    balancer.mark_failed("b3");
    for _ in 0..20 {
        assert_ne!(balancer.select().unwrap().id, "b3");
    }
}

#[test]
fn random_only_picks_available_backends() {
    let registry = pool(&["b1", "b2", "b3", "b4"]);
    let balancer = LoadBalancerFactory::create(BalancerStrategy::Random, registry).unwrap();

    balancer.mark_failed("b1");
    balancer.mark_failed("b4");

    for _ in 0..100 {
        let picked = balancer.select().unwrap();
        assert!(picked.id == "b2" || picked.id == "b3");
    }
}

#[test]
fn factory_builds_implemented_strategies() {
    let registry = pool(&["b1"]);
    assert!(
        LoadBalancerFactory::create(BalancerStrategy::RoundRobin, Arc::clone(&registry)).is_ok()
    );
    assert!(LoadBalancerFactory::create(BalancerStrategy::Random, Arc::clone(&registry)).is_ok());
}

#[test]
fn factory_refuses_reserved_strategies() {
    let registry = pool(&["b1"]);
    assert!(
        LoadBalancerFactory::create(BalancerStrategy::Weighted, Arc::clone(&registry)).is_err()
    );
    assert!(
        LoadBalancerFactory::create(BalancerStrategy::LeastConnections, registry).is_err()
    );
}

#[test]
fn selection_is_safe_under_concurrent_callers() {
    let registry = pool(&["b1", "b2", "b3"]);
    let balancer = Arc::new(RoundRobinBalancer::new(registry));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let balancer = Arc::clone(&balancer);
        handles.push(std::thread::spawn(move || {
            for _ in 0..500 {
                balancer.select().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}
