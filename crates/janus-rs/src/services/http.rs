//! Plain HTTP forwarding.
//!
//! Converts an admitted inbound request into an upstream request against
//! the selected origin and streams the response back. Neither direction is
//! buffered whole: the inbound body is bridged chunk by chunk into the
//! upstream request, and the upstream body is streamed straight into the
//! client response.

use crate::models::backend::Backend;
use crate::models::error::ProxyError;
use crate::services::circuit_breaker::CircuitBreaker;
use crate::utils::url::upstream_url;

use actix_web::http::{Method as ActixMethod, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use ahash::AHashSet;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap as ReqwestHeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method as ReqwestMethod};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Constant identifier appended to every upstream request.
pub const PROXY_ID: &str = concat!("janus-rs/", env!("CARGO_PKG_VERSION"));

/// Headers owned by the transport layer, never copied upstream verbatim.
static SKIP_HEADERS: Lazy<AHashSet<&'static str>> = Lazy::new(|| {
    [
        "host",
        "content-length",
        "transfer-encoding",
        "connection",
        "keep-alive",
        "proxy-connection",
        "upgrade",
    ]
    .into_iter()
    .collect()
});

/// HTTP forwarder backed by a pooled client.
#[derive(Clone)]
pub struct HttpForwarder {
    client: Client,
    /// Deadline for the dial-and-headers phase, in seconds. The body
    /// streaming phase is bounded only by peer liveness.
    timeout_seconds: u64,
}

impl HttpForwarder {
    /// Creates a forwarder with connection pooling enabled.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be constructed, which indicates a
    /// system resource problem at startup.
    pub fn new(timeout_seconds: u64) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            timeout_seconds,
        }
    }

    /// Forwards one exchange to the given origin.
    ///
    /// Transport failures before response headers map to `502` and count as
    /// breaker failures. An upstream `5xx` is forwarded to the client as-is
    /// but still counts as a failure; `2xx`/`3xx`/`4xx` count as success.
    pub async fn forward(
        &self,
        req: &HttpRequest,
        payload: web::Payload,
        backend: &Backend,
        breaker: &Arc<CircuitBreaker>,
    ) -> Result<HttpResponse, ProxyError> {
        let target_url = upstream_url(backend.base(), req.path(), req.query_string());
        debug!("Forwarding {} {} to {}", req.method(), req.path(), target_url);

        let method = convert_method(req.method());
        let mut headers = build_upstream_headers(req.headers());
        apply_forwarding_headers(&mut headers, req);

        let mut upstream_req = self.client.request(method, &target_url).headers(headers);

        if !matches!(req.method(), &ActixMethod::GET | &ActixMethod::HEAD) {
            upstream_req = upstream_req.body(reqwest::Body::wrap_stream(bridge_payload(payload)));
        }

        let response = match timeout(
            Duration::from_secs(self.timeout_seconds),
            upstream_req.send(),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                breaker.record_failure();
                warn!("Upstream request to {} failed: {}", target_url, e);
                return Err(ProxyError::Upstream {
                    message: e.to_string(),
                    url: target_url,
                });
            }
            Err(_) => {
                breaker.record_failure();
                warn!(
                    "Upstream request to {} timed out after {}s",
                    target_url, self.timeout_seconds
                );
                return Err(ProxyError::Timeout {
                    timeout: self.timeout_seconds,
                });
            }
        };

        let status = response.status();
        if status.is_server_error() {
            breaker.record_failure();
        } else {
            breaker.record_success();
        }

        let mut builder = HttpResponse::build(
            StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
        );

        let mut saw_content_type = false;
        for (key, value) in response.headers() {
            if key.as_str().starts_with("connection") || key.as_str() == "transfer-encoding" {
                continue;
            }
            if key.as_str().eq_ignore_ascii_case("content-type") {
                saw_content_type = true;
            }
            if let Ok(header_value) =
                actix_web::http::header::HeaderValue::from_bytes(value.as_bytes())
            {
                builder.insert_header((key.as_str(), header_value));
            }
        }
        if !saw_content_type {
            builder.insert_header(("content-type", "application/octet-stream"));
        }

        // Stream the upstream body through; a mid-stream read error ends
        // the exchange and counts against the breaker.
        let stream_breaker = Arc::clone(breaker);
        let body = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| {
                stream_breaker.record_failure();
                std::io::Error::new(std::io::ErrorKind::Other, e)
            })
        });

        Ok(builder.streaming(body))
    }
}

/// Bridges the inbound payload onto a sendable stream for the upstream
/// request body. The bounded channel keeps backpressure intact: reading
/// from the client stalls whenever the upstream write side stalls.
fn bridge_payload(
    mut payload: web::Payload,
) -> futures::channel::mpsc::Receiver<Result<web::Bytes, std::io::Error>> {
    let (mut tx, rx) = futures::channel::mpsc::channel::<Result<web::Bytes, std::io::Error>>(8);

    actix_web::rt::spawn(async move {
        while let Some(chunk) = payload.next().await {
            let item = chunk
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
            let stop = item.is_err();
            if tx.send(item).await.is_err() || stop {
                break;
            }
        }
    });

    rx
}

/// Copies inbound headers for upstream forwarding, dropping the ones the
/// transport sets itself.
pub(crate) fn build_upstream_headers(
    original_headers: &actix_web::http::header::HeaderMap,
) -> ReqwestHeaderMap {
    let mut headers = ReqwestHeaderMap::with_capacity(original_headers.len());

    for (key, value) in original_headers {
        // Header names arrive normalized to lowercase.
        if SKIP_HEADERS.contains(key.as_str()) {
            continue;
        }

        if let (Ok(name), Ok(header_value)) = (
            HeaderName::from_bytes(key.as_ref()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.append(name, header_value);
        }
    }

    headers
}

/// Appends the standard forwarding header set for one exchange.
///
/// `X-Forwarded-For` carries the inbound value when present and otherwise
/// the socket peer address; the remaining headers describe the edge as this
/// proxy observed it.
pub(crate) fn apply_forwarding_headers(headers: &mut ReqwestHeaderMap, req: &HttpRequest) {
    let forwarded_for = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()));

    if let Some(value) = forwarded_for.and_then(|v| HeaderValue::from_str(&v).ok()) {
        headers.insert("x-forwarded-for", value);
    }

    let conn = req.connection_info();
    if let Ok(value) = HeaderValue::from_str(conn.scheme()) {
        headers.insert("x-forwarded-proto", value);
    }
    if let Ok(value) = HeaderValue::from_str(conn.host()) {
        headers.insert("x-forwarded-host", value);
    }

    let local_port = req.app_config().local_addr().port();
    if let Ok(value) = HeaderValue::from_str(&local_port.to_string()) {
        headers.insert("x-forwarded-port", value);
    }

    headers.insert("x-proxy-id", HeaderValue::from_static(PROXY_ID));
}

fn convert_method(method: &ActixMethod) -> ReqwestMethod {
    match *method {
        ActixMethod::GET => ReqwestMethod::GET,
        ActixMethod::POST => ReqwestMethod::POST,
        ActixMethod::PUT => ReqwestMethod::PUT,
        ActixMethod::DELETE => ReqwestMethod::DELETE,
        ActixMethod::HEAD => ReqwestMethod::HEAD,
        ActixMethod::OPTIONS => ReqwestMethod::OPTIONS,
        _ => ReqwestMethod::GET,
    }
}
