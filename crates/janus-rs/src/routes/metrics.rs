//! Counters and the plain-text metrics endpoint.
//!
//! [`ProxyMetrics`] is the event-counter half of the observer surface: it
//! tallies inbound requests by method, responses by status class, and
//! circuit breaker transitions by name. All counters are lock-free atomics
//! safe to bump from any worker. The `/metrics` endpoint renders them in
//! Prometheus exposition format together with the live per-origin breaker
//! state.

use crate::services::circuit_breaker::{
    BreakerEventSink, BreakerTransition, CircuitBreakerRegistry, CircuitState,
};
use actix_web::http::{Method, StatusCode};
use actix_web::{web, HttpResponse, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Thread-safe counter set for the proxy.
///
/// The collector is cloned freely; clones share the same underlying
/// counters.
#[derive(Debug, Clone)]
pub struct ProxyMetrics {
    requests_total: Arc<AtomicU64>,
    requests_get: Arc<AtomicU64>,
    requests_post: Arc<AtomicU64>,
    requests_put: Arc<AtomicU64>,
    requests_delete: Arc<AtomicU64>,
    requests_options: Arc<AtomicU64>,
    requests_head: Arc<AtomicU64>,
    requests_other: Arc<AtomicU64>,

    responses_1xx: Arc<AtomicU64>,
    responses_2xx: Arc<AtomicU64>,
    responses_3xx: Arc<AtomicU64>,
    responses_4xx: Arc<AtomicU64>,
    responses_5xx: Arc<AtomicU64>,

    breaker_transitions_total: Arc<AtomicU64>,
    breaker_closed_to_open: Arc<AtomicU64>,
    breaker_open_to_half_open: Arc<AtomicU64>,
    breaker_half_open_to_closed: Arc<AtomicU64>,
    breaker_half_open_to_open: Arc<AtomicU64>,

    active_connections: Arc<AtomicU64>,
    start_time: Instant,
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            requests_get: Arc::new(AtomicU64::new(0)),
            requests_post: Arc::new(AtomicU64::new(0)),
            requests_put: Arc::new(AtomicU64::new(0)),
            requests_delete: Arc::new(AtomicU64::new(0)),
            requests_options: Arc::new(AtomicU64::new(0)),
            requests_head: Arc::new(AtomicU64::new(0)),
            requests_other: Arc::new(AtomicU64::new(0)),
            responses_1xx: Arc::new(AtomicU64::new(0)),
            responses_2xx: Arc::new(AtomicU64::new(0)),
            responses_3xx: Arc::new(AtomicU64::new(0)),
            responses_4xx: Arc::new(AtomicU64::new(0)),
            responses_5xx: Arc::new(AtomicU64::new(0)),
            breaker_transitions_total: Arc::new(AtomicU64::new(0)),
            breaker_closed_to_open: Arc::new(AtomicU64::new(0)),
            breaker_open_to_half_open: Arc::new(AtomicU64::new(0)),
            breaker_half_open_to_closed: Arc::new(AtomicU64::new(0)),
            breaker_half_open_to_open: Arc::new(AtomicU64::new(0)),
            active_connections: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }
}

impl ProxyMetrics {
    /// Counts one inbound request by method.
    pub fn record_request(&self, method: &Method) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let counter = match method.as_str() {
            "GET" => &self.requests_get,
            "POST" => &self.requests_post,
            "PUT" => &self.requests_put,
            "DELETE" => &self.requests_delete,
            "OPTIONS" => &self.requests_options,
            "HEAD" => &self.requests_head,
            _ => &self.requests_other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one response by status class.
    pub fn record_response(&self, status: StatusCode) {
        let counter = match status.as_u16() {
            100..=199 => &self.responses_1xx,
            200..=299 => &self.responses_2xx,
            300..=399 => &self.responses_3xx,
            400..=499 => &self.responses_4xx,
            _ => &self.responses_5xx,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn breaker_transitions_total(&self) -> u64 {
        self.breaker_transitions_total.load(Ordering::Relaxed)
    }

    pub fn responses_in_class(&self, class: u16) -> u64 {
        let counter = match class {
            1 => &self.responses_1xx,
            2 => &self.responses_2xx,
            3 => &self.responses_3xx,
            4 => &self.responses_4xx,
            _ => &self.responses_5xx,
        };
        counter.load(Ordering::Relaxed)
    }
}

impl BreakerEventSink for ProxyMetrics {
    fn on_transition(&self, transition: &BreakerTransition) {
        self.breaker_transitions_total.fetch_add(1, Ordering::Relaxed);

        let counter = match (transition.from, transition.to) {
            (CircuitState::Closed, CircuitState::Open) => &self.breaker_closed_to_open,
            (CircuitState::Open, CircuitState::HalfOpen) => &self.breaker_open_to_half_open,
            (CircuitState::HalfOpen, CircuitState::Closed) => &self.breaker_half_open_to_closed,
            (CircuitState::HalfOpen, CircuitState::Open) => &self.breaker_half_open_to_open,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Renders the textual metrics snapshot.
///
/// Includes, at minimum: inbound request counts by method, response counts
/// by status class, breaker transition tallies, and the current breaker
/// state per origin (0 closed, 1 open, 2 half-open).
pub async fn metrics_endpoint(
    metrics: web::Data<ProxyMetrics>,
    breakers: web::Data<CircuitBreakerRegistry>,
) -> Result<HttpResponse> {
    let m = metrics.get_ref();
    let uptime = m.start_time.elapsed().as_secs();

    let mut body = String::with_capacity(2048);

    body.push_str("# HELP janus_requests_total Total number of inbound requests\n");
    body.push_str("# TYPE janus_requests_total counter\n");
    body.push_str(&format!(
        "janus_requests_total {}\n\n",
        m.requests_total.load(Ordering::Relaxed)
    ));

    body.push_str("# HELP janus_requests_by_method Inbound requests by HTTP method\n");
    body.push_str("# TYPE janus_requests_by_method counter\n");
    for (name, counter) in [
        ("GET", &m.requests_get),
        ("POST", &m.requests_post),
        ("PUT", &m.requests_put),
        ("DELETE", &m.requests_delete),
        ("OPTIONS", &m.requests_options),
        ("HEAD", &m.requests_head),
        ("OTHER", &m.requests_other),
    ] {
        body.push_str(&format!(
            "janus_requests_by_method{{method=\"{}\"}} {}\n",
            name,
            counter.load(Ordering::Relaxed)
        ));
    }
    body.push('\n');

    body.push_str("# HELP janus_responses_by_class Responses by status class\n");
    body.push_str("# TYPE janus_responses_by_class counter\n");
    for (name, counter) in [
        ("1xx", &m.responses_1xx),
        ("2xx", &m.responses_2xx),
        ("3xx", &m.responses_3xx),
        ("4xx", &m.responses_4xx),
        ("5xx", &m.responses_5xx),
    ] {
        body.push_str(&format!(
            "janus_responses_by_class{{class=\"{}\"}} {}\n",
            name,
            counter.load(Ordering::Relaxed)
        ));
    }
    body.push('\n');

    body.push_str("# HELP janus_breaker_transitions_total Total circuit breaker transitions\n");
    body.push_str("# TYPE janus_breaker_transitions_total counter\n");
    body.push_str(&format!(
        "janus_breaker_transitions_total {}\n\n",
        m.breaker_transitions_total.load(Ordering::Relaxed)
    ));

    body.push_str("# HELP janus_breaker_transitions Circuit breaker transitions by name\n");
    body.push_str("# TYPE janus_breaker_transitions counter\n");
    for (name, counter) in [
        ("closed_to_open", &m.breaker_closed_to_open),
        ("open_to_half_open", &m.breaker_open_to_half_open),
        ("half_open_to_closed", &m.breaker_half_open_to_closed),
        ("half_open_to_open", &m.breaker_half_open_to_open),
    ] {
        body.push_str(&format!(
            "janus_breaker_transitions{{transition=\"{}\"}} {}\n",
            name,
            counter.load(Ordering::Relaxed)
        ));
    }
    body.push('\n');

    body.push_str(
        "# HELP janus_breaker_state Circuit breaker state per origin (0=Closed, 1=Open, 2=HalfOpen)\n",
    );
    body.push_str("# TYPE janus_breaker_state gauge\n");
    for (backend, state, failures) in breakers.snapshot() {
        body.push_str(&format!(
            "janus_breaker_state{{backend=\"{}\"}} {}\n",
            backend, state as u8
        ));
        body.push_str(&format!(
            "janus_breaker_failures{{backend=\"{}\"}} {}\n",
            backend, failures
        ));
    }
    body.push('\n');

    body.push_str("# HELP janus_active_connections Current number of active exchanges\n");
    body.push_str("# TYPE janus_active_connections gauge\n");
    body.push_str(&format!(
        "janus_active_connections {}\n\n",
        m.active_connections.load(Ordering::Relaxed)
    ));

    body.push_str("# HELP janus_uptime_seconds Service uptime in seconds\n");
    body.push_str("# TYPE janus_uptime_seconds counter\n");
    body.push_str(&format!("janus_uptime_seconds {}\n", uptime));

    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(body))
}

/// Registers the `/metrics` endpoint.
pub fn configure_metrics(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_endpoint));
}
