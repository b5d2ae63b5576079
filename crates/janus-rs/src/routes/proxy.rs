//! The externally bound request entry point.
//!
//! Every inbound request that is not an operational endpoint lands here.
//! The pipeline per request: admission gate, protocol dispatch by upgrade
//! or `Accept` header, origin selection, circuit breaker admission, and
//! finally the protocol adapter. Rejections at any stage answer the client
//! directly without dialing an origin.

use crate::models::error::ProxyError;
use crate::routes::metrics::ProxyMetrics;
use crate::services::circuit_breaker::CircuitBreakerRegistry;
use crate::services::gate::SecurityGate;
use crate::services::http::HttpForwarder;
use crate::services::load_balancer::LoadBalancer;
use crate::services::sse::SseForwarder;
use crate::services::websocket::WebSocketForwarder;

use actix_web::error::ResponseError;
use actix_web::http::Method;
use actix_web::{web, HttpRequest, HttpResponse};
use log::debug;
use std::sync::Arc;
use uuid::Uuid;

/// Which adapter serves an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Http,
    WebSocket,
    Sse,
}

/// Everything the entry point needs, shared across workers.
pub struct ProxyState {
    pub gate: SecurityGate,
    pub balancer: Arc<dyn LoadBalancer>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub http: HttpForwarder,
    pub websocket: WebSocketForwarder,
    pub sse: SseForwarder,
}

/// Picks the protocol adapter for an inbound request.
///
/// A WebSocket upgrade handshake wins over everything; a GET whose
/// `Accept` header mentions `text/event-stream` goes to the SSE adapter;
/// anything else is plain HTTP. A non-GET carrying the SSE accept header
/// deliberately falls through to the HTTP adapter.
pub fn classify(req: &HttpRequest) -> ProtocolKind {
    if is_websocket_upgrade(req) {
        return ProtocolKind::WebSocket;
    }

    if req.method() == Method::GET && accepts_event_stream(req) {
        return ProtocolKind::Sse;
    }

    ProtocolKind::Http
}

fn is_websocket_upgrade(req: &HttpRequest) -> bool {
    let upgrade_to_websocket = req
        .headers()
        .get(actix_web::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    let connection_upgrades = req
        .headers()
        .get(actix_web::http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        })
        .unwrap_or(false);

    upgrade_to_websocket && connection_upgrades
}

fn accepts_event_stream(req: &HttpRequest) -> bool {
    req.headers()
        .get(actix_web::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

/// Entry handler wired as the application's default service.
pub async fn forward(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<ProxyState>,
    metrics: web::Data<ProxyMetrics>,
) -> Result<HttpResponse, ProxyError> {
    metrics.record_request(req.method());
    metrics.increment_connections();

    let result = handle(&req, payload, state.get_ref()).await;

    metrics.decrement_connections();
    match &result {
        Ok(response) => metrics.record_response(response.status()),
        Err(error) => metrics.record_response(error.status_code()),
    }

    result
}

async fn handle(
    req: &HttpRequest,
    payload: web::Payload,
    state: &ProxyState,
) -> Result<HttpResponse, ProxyError> {
    state.gate.check(req)?;

    let kind = classify(req);

    let backend = state
        .balancer
        .select()
        .map_err(|_| ProxyError::NoAvailableBackend)?;

    let breaker = state.breakers.breaker(&backend.id);
    if breaker.try_acquire().is_err() {
        debug!("Circuit open for backend {}, failing fast", backend.id);
        return Err(ProxyError::CircuitOpen {
            backend: backend.id,
        });
    }

    let exchange_id = Uuid::new_v4();
    debug!(
        "[{}] {} {} dispatched as {:?} via backend {}",
        exchange_id,
        req.method(),
        req.path(),
        kind,
        backend.id
    );

    match kind {
        ProtocolKind::Http => state.http.forward(req, payload, &backend, &breaker).await,
        ProtocolKind::WebSocket => {
            state
                .websocket
                .forward(req, payload, &backend, &breaker)
                .await
        }
        ProtocolKind::Sse => state.sse.forward(req, &backend, &breaker).await,
    }
}
