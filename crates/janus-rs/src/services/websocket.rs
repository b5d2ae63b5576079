//! WebSocket forwarding.
//!
//! Completes the server-side upgrade with the client, dials the origin with
//! a matching upgrade request, then runs two pumps until either side closes
//! or errors: client-to-upstream and upstream-to-client. Each pump reads
//! one frame and writes it before reading the next, so a stalled writer
//! back-pressures its reader and no frames queue unbounded.

use crate::models::backend::Backend;
use crate::models::error::ProxyError;
use crate::models::settings::WebSocketSettings;
use crate::services::circuit_breaker::CircuitBreaker;
use crate::utils::url::ws_upstream_url;

use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{CloseCode, CloseReason, Message};
use ahash::AHashSet;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as UpstreamCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::Message as UpstreamMessage;

/// Inbound headers never copied onto the upstream handshake. The
/// WebSocket client library generates its own handshake fields.
static SKIP_HANDSHAKE_HEADERS: Lazy<AHashSet<&'static str>> = Lazy::new(|| {
    [
        "host",
        "connection",
        "upgrade",
        "content-length",
        "transfer-encoding",
        "keep-alive",
        "proxy-connection",
        "sec-websocket-key",
        "sec-websocket-version",
        "sec-websocket-accept",
        "sec-websocket-extensions",
    ]
    .into_iter()
    .collect()
});

/// WebSocket proxy handler.
#[derive(Clone)]
pub struct WebSocketForwarder {
    ping_interval: Duration,
    idle_timeout: Duration,
    dial_timeout: Duration,
}

impl WebSocketForwarder {
    pub fn new(settings: &WebSocketSettings, dial_timeout_seconds: u64) -> Self {
        Self {
            ping_interval: Duration::from_millis(settings.ping_interval_ms),
            idle_timeout: Duration::from_millis(settings.idle_timeout_ms),
            dial_timeout: Duration::from_secs(dial_timeout_seconds),
        }
    }

    /// Upgrades the client connection and splices it to the origin.
    ///
    /// A failed origin dial counts as a breaker failure and closes the
    /// half-upgraded client; a normal close from either side does not.
    pub async fn forward(
        &self,
        req: &HttpRequest,
        stream: web::Payload,
        backend: &Backend,
        breaker: &Arc<CircuitBreaker>,
    ) -> Result<HttpResponse, ProxyError> {
        let target_url = ws_upstream_url(backend.base(), req.path(), req.query_string());
        info!("Upgrading WebSocket connection toward {}", target_url);

        let upstream_request = build_handshake_request(&target_url, req)?;

        let (response, session, client_stream) = actix_ws::handle(req, stream)
            .map_err(|e| ProxyError::Internal {
                message: format!("WebSocket upgrade failed: {}", e),
            })?;

        let dialed = timeout(self.dial_timeout, connect_async(upstream_request)).await;
        let upstream = match dialed {
            Ok(Ok((upstream, _))) => upstream,
            Ok(Err(e)) => {
                breaker.record_failure();
                warn!("Failed to dial upstream WebSocket {}: {}", target_url, e);
                close_session(session, CloseCode::Error).await;
                return Err(ProxyError::Upstream {
                    message: e.to_string(),
                    url: target_url,
                });
            }
            Err(_) => {
                breaker.record_failure();
                warn!("Timed out dialing upstream WebSocket {}", target_url);
                close_session(session, CloseCode::Error).await;
                return Err(ProxyError::Timeout {
                    timeout: self.dial_timeout.as_secs(),
                });
            }
        };

        breaker.record_success();

        let (upstream_write, upstream_read) = upstream.split();

        let started = Instant::now();
        let last_activity = Arc::new(AtomicU64::new(0));

        self.spawn_client_to_upstream(
            client_stream,
            upstream_write,
            session.clone(),
            Arc::clone(&last_activity),
            started,
        );
        self.spawn_upstream_to_client(
            upstream_read,
            session.clone(),
            Arc::clone(breaker),
            Arc::clone(&last_activity),
            started,
        );
        self.spawn_keepalive(session, Arc::clone(&last_activity), started);

        Ok(response)
    }

    /// Pump: read frames from the client, write them upstream.
    fn spawn_client_to_upstream(
        &self,
        mut client_stream: actix_ws::MessageStream,
        mut upstream_write: futures_util::stream::SplitSink<
            tokio_tungstenite::WebSocketStream<
                tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
            >,
            UpstreamMessage,
        >,
        session: actix_ws::Session,
        last_activity: Arc<AtomicU64>,
        started: Instant,
    ) {
        actix_web::rt::spawn(async move {
            while let Some(Ok(msg)) = client_stream.next().await {
                last_activity.store(started.elapsed().as_millis() as u64, Ordering::Relaxed);

                let upstream_msg = match msg {
                    Message::Text(text) => UpstreamMessage::Text(text.to_string()),
                    Message::Binary(bin) => UpstreamMessage::Binary(bin.to_vec()),
                    Message::Ping(bytes) => UpstreamMessage::Ping(bytes.to_vec()),
                    Message::Pong(bytes) => UpstreamMessage::Pong(bytes.to_vec()),
                    Message::Close(reason) => {
                        debug!("Client closed WebSocket: {:?}", reason);
                        let frame = reason.map(|r| CloseFrame {
                            code: UpstreamCloseCode::from(u16::from(r.code)),
                            reason: r.description.unwrap_or_default().into(),
                        });
                        let _ = upstream_write.send(UpstreamMessage::Close(frame)).await;
                        break;
                    }
                    _ => continue,
                };

                if let Err(e) = upstream_write.send(upstream_msg).await {
                    warn!("Failed to forward frame to upstream: {}", e);
                    let _ = session.close(None).await;
                    break;
                }
            }
            debug!("Client to upstream pump finished");
        });
    }

    /// Pump: read frames from the origin, write them to the client.
    fn spawn_upstream_to_client(
        &self,
        mut upstream_read: futures_util::stream::SplitStream<
            tokio_tungstenite::WebSocketStream<
                tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
            >,
        >,
        mut session: actix_ws::Session,
        breaker: Arc<CircuitBreaker>,
        last_activity: Arc<AtomicU64>,
        started: Instant,
    ) {
        actix_web::rt::spawn(async move {
            while let Some(result) = upstream_read.next().await {
                last_activity.store(started.elapsed().as_millis() as u64, Ordering::Relaxed);

                match result {
                    Ok(UpstreamMessage::Text(text)) => {
                        if session.text(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(UpstreamMessage::Binary(bin)) => {
                        if session.binary(bin).await.is_err() {
                            break;
                        }
                    }
                    Ok(UpstreamMessage::Ping(bytes)) => {
                        if session.ping(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Ok(UpstreamMessage::Pong(bytes)) => {
                        if session.pong(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Ok(UpstreamMessage::Close(frame)) => {
                        debug!("Upstream closed WebSocket: {:?}", frame);
                        let reason = frame.map(|f| CloseReason {
                            code: CloseCode::from(u16::from(f.code)),
                            description: if f.reason.is_empty() {
                                None
                            } else {
                                Some(f.reason.to_string())
                            },
                        });
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        // Abnormal termination of the origin side.
                        warn!("Error receiving from upstream WebSocket: {}", e);
                        breaker.record_failure();
                        let _ = session
                            .close(Some(CloseReason {
                                code: CloseCode::Error,
                                description: None,
                            }))
                            .await;
                        break;
                    }
                }
            }
            debug!("Upstream to client pump finished");
        });
    }

    /// Sends ping frames on a fixed interval and closes the connection once
    /// it has been idle longer than the configured limit.
    fn spawn_keepalive(
        &self,
        mut session: actix_ws::Session,
        last_activity: Arc<AtomicU64>,
        started: Instant,
    ) {
        let ping_interval = self.ping_interval;
        let idle_timeout = self.idle_timeout;

        actix_web::rt::spawn(async move {
            let mut ticker = tokio::time::interval(ping_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let idle_ms = started
                    .elapsed()
                    .as_millis()
                    .saturating_sub(last_activity.load(Ordering::Relaxed) as u128);

                if idle_ms >= idle_timeout.as_millis() {
                    info!("Closing idle WebSocket connection after {}ms", idle_ms);
                    let _ = session
                        .close(Some(CloseReason {
                            code: CloseCode::Away,
                            description: Some("idle timeout".to_string()),
                        }))
                        .await;
                    break;
                }

                if session.ping(b"").await.is_err() {
                    break;
                }
            }
        });
    }
}

async fn close_session(session: actix_ws::Session, code: CloseCode) {
    let _ = session
        .close(Some(CloseReason {
            code,
            description: None,
        }))
        .await;
}

/// Builds the upstream handshake request, carrying over inbound headers
/// except the handshake fields the client library owns.
fn build_handshake_request(
    target_url: &str,
    req: &HttpRequest,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, ProxyError> {
    let mut upstream_request =
        target_url
            .into_client_request()
            .map_err(|e| ProxyError::Upstream {
                message: format!("invalid upstream WebSocket URL: {}", e),
                url: target_url.to_string(),
            })?;

    for (key, value) in req.headers() {
        if SKIP_HANDSHAKE_HEADERS.contains(key.as_str()) {
            continue;
        }

        use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
        if let (Ok(name), Ok(header_value)) = (
            HeaderName::from_bytes(key.as_ref()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            upstream_request.headers_mut().append(name, header_value);
        }
    }

    Ok(upstream_request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn handshake_request_skips_client_handshake_headers() {
        let req = TestRequest::get()
            .uri("/echo")
            .insert_header(("sec-websocket-key", "abc"))
            .insert_header(("sec-websocket-version", "13"))
            .insert_header(("authorization", "Bearer t"))
            .to_http_request();

        let upstream = build_handshake_request("ws://127.0.0.1:9001/echo", &req).unwrap();
        assert!(upstream.headers().get("authorization").is_some());
        // The client library generates its own key during the handshake;
        // the inbound one must not leak through.
        assert!(upstream.headers().get("sec-websocket-key").is_none());
    }
}
