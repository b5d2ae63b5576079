//! Server-sent events forwarding.
//!
//! Opens an upstream GET for `text/event-stream`, replies `200` with the
//! standard SSE response headers, writes an initial `retry:` directive and
//! then relays upstream bytes as they arrive. A heartbeat comment is
//! written whenever the upstream has been quiet for the configured
//! interval. All client writes go through one relay task, so heartbeats
//! and event bytes are serialized; a heartbeat is additionally withheld
//! while the relay sits in the middle of an event.

use crate::models::backend::Backend;
use crate::models::error::ProxyError;
use crate::models::settings::SseSettings;
use crate::services::circuit_breaker::CircuitBreaker;
use crate::services::http::{apply_forwarding_headers, build_upstream_headers};
use crate::utils::url::upstream_url;

use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use reqwest::header::HeaderValue;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// SSE proxy handler.
#[derive(Clone)]
pub struct SseForwarder {
    client: Client,
    retry_hint_ms: u64,
    heartbeat_interval: Duration,
    timeout_seconds: u64,
}

impl SseForwarder {
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be constructed at startup.
    pub fn new(settings: &SseSettings, timeout_seconds: u64) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            retry_hint_ms: settings.retry_hint_ms,
            heartbeat_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            timeout_seconds,
        }
    }

    /// Forwards one event-stream exchange to the given origin.
    ///
    /// A non-2xx upstream status maps to `502` and counts as a breaker
    /// failure, as do transport errors before or during the stream. The
    /// client going away is ordinary teardown.
    pub async fn forward(
        &self,
        req: &HttpRequest,
        backend: &Backend,
        breaker: &Arc<CircuitBreaker>,
    ) -> Result<HttpResponse, ProxyError> {
        let target_url = upstream_url(backend.base(), req.path(), req.query_string());
        debug!("Opening SSE relay toward {}", target_url);

        let mut headers = build_upstream_headers(req.headers());
        apply_forwarding_headers(&mut headers, req);
        headers.insert("accept", HeaderValue::from_static("text/event-stream"));

        let upstream_req = self.client.get(&target_url).headers(headers);

        let response = match timeout(
            Duration::from_secs(self.timeout_seconds),
            upstream_req.send(),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                breaker.record_failure();
                warn!("SSE upstream request to {} failed: {}", target_url, e);
                return Err(ProxyError::Upstream {
                    message: e.to_string(),
                    url: target_url,
                });
            }
            Err(_) => {
                breaker.record_failure();
                return Err(ProxyError::Timeout {
                    timeout: self.timeout_seconds,
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            breaker.record_failure();
            warn!("SSE upstream {} answered {}", target_url, status);
            return Err(ProxyError::Upstream {
                message: format!("upstream status {}", status),
                url: target_url,
            });
        }
        breaker.record_success();

        let (mut tx, rx) =
            futures::channel::mpsc::channel::<Result<web::Bytes, std::io::Error>>(8);

        let retry_line = format!("retry: {}\n\n", self.retry_hint_ms);
        let heartbeat_interval = self.heartbeat_interval;
        let relay_breaker = Arc::clone(breaker);

        tokio::spawn(async move {
            let mut upstream = response.bytes_stream();

            if tx.send(Ok(web::Bytes::from(retry_line))).await.is_err() {
                return;
            }

            // Relay loop. One task owns all client writes, so event bytes
            // and heartbeats can never interleave.
            let mut at_boundary = true;
            let mut prev_last: u8 = b'\n';

            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.reset();

            loop {
                tokio::select! {
                    chunk = upstream.next() => match chunk {
                        Some(Ok(bytes)) => {
                            if bytes.is_empty() {
                                continue;
                            }
                            at_boundary = ends_at_event_boundary(prev_last, &bytes);
                            prev_last = bytes[bytes.len() - 1];
                            if tx.send(Ok(bytes)).await.is_err() {
                                debug!("SSE client went away, stopping relay");
                                break;
                            }
                            ticker.reset();
                        }
                        Some(Err(e)) => {
                            warn!("SSE upstream read error: {}", e);
                            relay_breaker.record_failure();
                            let _ = tx
                                .send(Err(std::io::Error::new(
                                    std::io::ErrorKind::Other,
                                    e,
                                )))
                                .await;
                            break;
                        }
                        None => {
                            debug!("SSE upstream stream ended");
                            break;
                        }
                    },
                    _ = ticker.tick() => {
                        // Quiet period. Only comment between events.
                        if at_boundary
                            && tx
                                .send(Ok(web::Bytes::from_static(b": heartbeat\n\n")))
                                .await
                                .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });

        Ok(HttpResponse::Ok()
            .insert_header(("content-type", "text/event-stream"))
            .insert_header(("cache-control", "no-cache"))
            .insert_header(("connection", "keep-alive"))
            .streaming(rx))
    }
}

/// Whether the relay sits at an event boundary after writing `chunk`.
///
/// An event ends with a blank line, i.e. two consecutive newlines, which
/// may be split across chunk boundaries.
fn ends_at_event_boundary(prev_last: u8, chunk: &[u8]) -> bool {
    match chunk.len() {
        0 => prev_last == b'\n',
        1 => chunk[0] == b'\n' && prev_last == b'\n',
        _ => chunk.ends_with(b"\n\n"),
    }
}
