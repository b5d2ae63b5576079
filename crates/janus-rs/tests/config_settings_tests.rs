//! Tests for configuration parsing, defaults and validation.

use janus_rs::config::settings::expand_env;
use janus_rs::models::settings::{BalancerStrategy, IpFilterMode, Settings};

fn minimal_config() -> &'static str {
    r#"{
        "version": 1,
        "backends": [
            { "id": "b1", "url": "http://127.0.0.1:9001" }
        ]
    }"#
}

#[test]
fn minimal_config_parses_with_defaults() {
    let settings: Settings = serde_json::from_str(minimal_config()).unwrap();

    assert_eq!(settings.version, 1);
    assert_eq!(settings.backends.len(), 1);
    assert_eq!(settings.backends[0].weight, 1);
    assert_eq!(settings.balancer.strategy, BalancerStrategy::RoundRobin);
    assert_eq!(settings.breaker.failure_threshold, 50);
    assert_eq!(settings.breaker.open_duration_ms, 60_000);
    assert!(settings.security.ip.is_none());
    assert!(settings.security.rate.is_none());
    assert!(settings.security.query_filter);
    assert_eq!(settings.sse.retry_hint_ms, 3_000);
    assert_eq!(settings.sse.heartbeat_interval_ms, 15_000);
    assert_eq!(settings.websocket.ping_interval_ms, 30_000);
    assert_eq!(settings.timeout_seconds, 30);

    assert!(settings.validate().is_ok());
}

#[test]
fn full_config_parses() {
    let raw = r#"{
        "version": 1,
        "backends": [
            { "id": "b1", "url": "http://127.0.0.1:9001", "weight": 2, "health_check_path": "/health" },
            { "id": "b2", "url": "https://origin.internal:9002" }
        ],
        "balancer": { "strategy": "random" },
        "breaker": { "failure_threshold": 3, "open_duration_ms": 200 },
        "security": {
            "ip": { "mode": "allow-list", "allow": ["127.0.0.1"] },
            "rate": { "limit": 3, "window_s": 1 },
            "query_filter": true,
            "max_body_bytes": 1048576
        },
        "websocket": { "ping_interval_ms": 5000, "idle_timeout_ms": 20000 },
        "sse": { "retry_hint_ms": 3000, "heartbeat_interval_ms": 1000 },
        "timeout_seconds": 10
    }"#;

    let settings: Settings = serde_json::from_str(raw).unwrap();
    assert!(settings.validate().is_ok());

    assert_eq!(settings.balancer.strategy, BalancerStrategy::Random);
    assert_eq!(settings.breaker.failure_threshold, 3);
    let ip = settings.security.ip.as_ref().unwrap();
    assert_eq!(ip.mode, IpFilterMode::AllowList);
    assert_eq!(ip.allow, vec!["127.0.0.1".to_string()]);
    assert_eq!(settings.security.max_body_bytes, Some(1_048_576));
    assert_eq!(settings.backends[1].id, "b2");
    assert!(settings.backends[1].url.starts_with("https://"));
}

#[test]
fn reserved_strategy_names_parse_but_unknown_names_do_not() {
    let raw = minimal_config().replace(
        "\"backends\"",
        "\"balancer\": { \"strategy\": \"least-connections\" }, \"backends\"",
    );
    let settings: Settings = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        settings.balancer.strategy,
        BalancerStrategy::LeastConnections
    );

    let raw = minimal_config().replace(
        "\"backends\"",
        "\"balancer\": { \"strategy\": \"sticky-session\" }, \"backends\"",
    );
    assert!(serde_json::from_str::<Settings>(&raw).is_err());
}

#[test]
fn duplicate_backend_ids_fail_validation() {
    let raw = r#"{
        "version": 1,
        "backends": [
            { "id": "b1", "url": "http://127.0.0.1:9001" },
            { "id": "b1", "url": "http://127.0.0.1:9002" }
        ]
    }"#;
    let settings: Settings = serde_json::from_str(raw).unwrap();
    let err = settings.validate().unwrap_err();
    assert!(err.contains("Duplicate"), "unexpected error: {}", err);
}

#[test]
fn backend_url_scheme_is_validated() {
    let raw = r#"{
        "version": 1,
        "backends": [ { "id": "b1", "url": "ftp://127.0.0.1:9001" } ]
    }"#;
    let settings: Settings = serde_json::from_str(raw).unwrap();
    assert!(settings.validate().is_err());
}

#[test]
fn empty_backend_pool_fails_validation() {
    let raw = r#"{ "version": 1, "backends": [] }"#;
    let settings: Settings = serde_json::from_str(raw).unwrap();
    assert!(settings.validate().is_err());
}

#[test]
fn zero_policy_knobs_fail_validation() {
    let raw = r#"{
        "version": 1,
        "backends": [ { "id": "b1", "url": "http://127.0.0.1:9001" } ],
        "breaker": { "failure_threshold": 0 }
    }"#;
    let settings: Settings = serde_json::from_str(raw).unwrap();
    assert!(settings.validate().is_err());

    let raw = r#"{
        "version": 1,
        "backends": [ { "id": "b1", "url": "http://127.0.0.1:9001" } ],
        "security": { "rate": { "limit": 0, "window_s": 1 } }
    }"#;
    let settings: Settings = serde_json::from_str(raw).unwrap();
    assert!(settings.validate().is_err());
}

#[test]
fn environment_placeholders_expand_before_parsing() {
    std::env::set_var("JANUS_TEST_B1_URL", "http://10.1.1.1:9001");

    let raw = r#"{
        "version": 1,
        "backends": [ { "id": "b1", "url": "${JANUS_TEST_B1_URL}" } ]
    }"#;
    let settings: Settings = serde_json::from_str(&expand_env(raw)).unwrap();
    assert_eq!(settings.backends[0].url, "http://10.1.1.1:9001");
    assert!(settings.validate().is_ok());

    std::env::remove_var("JANUS_TEST_B1_URL");
}
