//! Integration tests for the proxy entry point.
//!
//! These exercise the admission, selection and breaker stages against an
//! in-process application. Origins point at a reserved local port, so any
//! test reaching the dial stage observes a connection failure rather than
//! a live origin.

use actix_web::http::Method;
use actix_web::{test, web, App};
use janus_rs::models::backend::Backend;
use janus_rs::models::settings::{
    IpFilterMode, IpFilterSettings, RateLimitSettings, SecuritySettings, SseSettings,
    WebSocketSettings,
};
use janus_rs::routes::metrics::{self, ProxyMetrics};
use janus_rs::routes::proxy;
use janus_rs::services::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, FanoutSink,
};
use janus_rs::services::gate::SecurityGate;
use janus_rs::services::http::HttpForwarder;
use janus_rs::services::load_balancer::{BackendRegistry, LoadBalancer, LoadBalancerFactory};
use janus_rs::services::sse::SseForwarder;
use janus_rs::services::websocket::WebSocketForwarder;
use std::sync::Arc;
use std::time::Duration;

fn unreachable_backend(id: &str) -> Backend {
    // Port 1 is reserved; dialing it fails immediately.
    Backend {
        id: id.to_string(),
        url: "http://127.0.0.1:1".to_string(),
        weight: 1,
        health_check_path: None,
    }
}

struct Harness {
    metrics: ProxyMetrics,
    balancer: Arc<dyn LoadBalancer>,
    breakers: Arc<CircuitBreakerRegistry>,
    state: web::Data<proxy::ProxyState>,
}

fn harness(backends: Vec<Backend>, security: SecuritySettings) -> Harness {
    let metrics = ProxyMetrics::default();
    let registry = Arc::new(BackendRegistry::new(backends));
    let balancer = LoadBalancerFactory::create(Default::default(), registry).unwrap();
    let breakers = Arc::new(CircuitBreakerRegistry::new(
        CircuitBreakerConfig {
            failure_threshold: 100,
            open_duration: Duration::from_secs(10),
        },
        Arc::new(FanoutSink::new(vec![Arc::new(metrics.clone())])),
    ));

    let state = web::Data::new(proxy::ProxyState {
        gate: SecurityGate::new(&security),
        balancer: Arc::clone(&balancer),
        breakers: Arc::clone(&breakers),
        http: HttpForwarder::new(2),
        websocket: WebSocketForwarder::new(&WebSocketSettings::default(), 2),
        sse: SseForwarder::new(&SseSettings::default(), 2),
    });

    Harness {
        metrics,
        balancer,
        breakers,
        state,
    }
}

macro_rules! app {
    ($harness:expr) => {
        test::init_service(
            App::new()
                .app_data($harness.state.clone())
                .app_data(web::Data::new($harness.metrics.clone()))
                .app_data(web::Data::from(Arc::clone(&$harness.breakers)))
                .configure(metrics::configure_metrics)
                .default_service(web::to(proxy::forward)),
        )
        .await
    };
}

#[actix_web::test]
async fn unknown_method_is_rejected_with_405() {
    let h = harness(vec![unreachable_backend("b1")], SecuritySettings::default());
    let app = app!(h);

    let req = test::TestRequest::default()
        .method(Method::TRACE)
        .uri("/x")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 405);
}

#[actix_web::test]
async fn traversal_path_is_rejected_with_400() {
    let h = harness(vec![unreachable_backend("b1")], SecuritySettings::default());
    let app = app!(h);

    for uri in ["/a/../b", "/a/b//c"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 400, "uri {}", uri);
    }
}

#[actix_web::test]
async fn suspicious_query_is_rejected_with_400() {
    let h = harness(vec![unreachable_backend("b1")], SecuritySettings::default());
    let app = app!(h);

    let req = test::TestRequest::get().uri("/search?q=1'--").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
}

#[actix_web::test]
async fn allow_list_blocks_other_addresses_with_403() {
    let security = SecuritySettings {
        ip: Some(IpFilterSettings {
            mode: IpFilterMode::AllowList,
            allow: vec!["127.0.0.1".to_string()],
            deny: vec![],
        }),
        ..Default::default()
    };
    let h = harness(vec![unreachable_backend("b1")], security);
    let app = app!(h);

    let req = test::TestRequest::get()
        .uri("/x")
        .peer_addr("10.0.0.1:50000".parse().unwrap())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 403);

    // The listed address passes admission and reaches the dial stage.
    let req = test::TestRequest::get()
        .uri("/x")
        .peer_addr("127.0.0.1:50000".parse().unwrap())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 502);
}

#[actix_web::test]
async fn rate_limit_rejects_the_request_over_budget() {
    let security = SecuritySettings {
        rate: Some(RateLimitSettings {
            limit: 3,
            window_s: 60,
        }),
        ..Default::default()
    };
    let h = harness(vec![unreachable_backend("b1")], security);
    let app = app!(h);

    for _ in 0..3 {
        let req = test::TestRequest::get()
            .uri("/x")
            .peer_addr("127.0.0.1:50000".parse().unwrap())
            .to_request();
        let resp = test::call_service(&app, req).await;
        // Admitted; fails later at the dial stage.
        assert_eq!(resp.status().as_u16(), 502);
    }

    let req = test::TestRequest::get()
        .uri("/x")
        .peer_addr("127.0.0.1:50000".parse().unwrap())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 429);
}

#[actix_web::test]
async fn empty_available_set_answers_503_without_dialing() {
    let h = harness(vec![unreachable_backend("b1")], SecuritySettings::default());
    h.balancer.mark_failed("b1");
    let app = app!(h);

    let req = test::TestRequest::get().uri("/x").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 503);

    // No breaker was ever consulted, so none was created.
    assert!(h.breakers.snapshot().is_empty());
}

#[actix_web::test]
async fn open_circuit_answers_503_without_dialing() {
    let h = harness(vec![unreachable_backend("b1")], SecuritySettings::default());

    let breaker = h.breakers.breaker("b1");
    for _ in 0..100 {
        breaker.record_failure();
    }
    assert_eq!(breaker.current_state(), CircuitState::Open);
    let failures_when_open = breaker.failure_count();

    let app = app!(h);
    let req = test::TestRequest::get().uri("/x").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 503);

    // Short-circuited: no dial happened, so no extra failure was recorded.
    assert_eq!(breaker.failure_count(), failures_when_open);
}

#[actix_web::test]
async fn dial_failure_maps_to_502_and_counts_against_the_breaker() {
    let h = harness(vec![unreachable_backend("b1")], SecuritySettings::default());
    let app = app!(h);

    let req = test::TestRequest::get().uri("/x").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 502);

    assert_eq!(h.breakers.breaker("b1").failure_count(), 1);
    assert_eq!(h.metrics.responses_in_class(5), 1);
}

#[actix_web::test]
async fn metrics_endpoint_reports_methods_classes_and_breaker_state() {
    let h = harness(vec![unreachable_backend("b1")], SecuritySettings::default());
    let app = app!(h);

    // One admitted GET (dial failure) and one rejected TRACE.
    let req = test::TestRequest::get().uri("/x").to_request();
    test::call_service(&app, req).await;
    let req = test::TestRequest::default()
        .method(Method::TRACE)
        .uri("/x")
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body = test::read_body(resp).await;
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("janus_requests_by_method{method=\"GET\"} "));
    assert!(text.contains("janus_responses_by_class{class=\"5xx\"} 1"));
    assert!(text.contains("janus_responses_by_class{class=\"4xx\"} 1"));
    assert!(text.contains("janus_breaker_state{backend=\"b1\"} 0"));
}
