//! Per-request admission checks, run before an origin is selected.
//!
//! Checks run in a fixed order and the first rejection wins: method
//! allow-list, path sanity, query-value sanity, content-type family,
//! payload size, IP filter, rate limit. A check whose configuration is
//! absent passes. Rejections are cheap, never dial an origin and never
//! touch a circuit breaker.

use crate::models::error::ProxyError;
use crate::models::settings::{IpFilterMode, SecuritySettings};
use actix_web::http::Method;
use actix_web::HttpRequest;
use ahash::{AHashMap, AHashSet};
use log::warn;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Query parameter values containing any of these sequences are rejected.
/// A deliberately strict injection heuristic carried over for
/// compatibility; it can be disabled via `security.query_filter`.
const QUERY_NEEDLES: [&str; 4] = ["'", "\"", ";", "--"];

/// Content type families accepted for POST and PUT bodies.
const ALLOWED_CONTENT_TYPES: [&str; 4] = [
    "application/json",
    "application/x-www-form-urlencoded",
    "multipart/form-data",
    "text/",
];

/// Entries beyond this count trigger a prune of stale rate-limit cells.
const RATE_CELL_PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug)]
struct IpFilter {
    mode: IpFilterMode,
    allow: AHashSet<String>,
    deny: AHashSet<String>,
}

/// One fixed-window counter per client identity.
#[derive(Debug, Clone, Copy)]
struct RateCell {
    count: u64,
    window: u64,
}

#[derive(Debug)]
struct RateLimiter {
    limit: u64,
    window_s: u64,
    cells: RwLock<AHashMap<String, RateCell>>,
}

impl RateLimiter {
    fn new(limit: u64, window_s: u64) -> Self {
        Self {
            limit,
            window_s,
            cells: RwLock::new(AHashMap::new()),
        }
    }

    /// Admits or rejects one request for the given client key.
    ///
    /// The window is fixed: it is derived from wall-clock seconds divided
    /// by the window length, and the counter resets whenever the window
    /// index changes. State is process-local and empty after a restart.
    fn admit(&self, key: &str) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let window = now / self.window_s;

        let mut cells = self.cells.write().unwrap_or_else(|e| e.into_inner());

        if cells.len() > RATE_CELL_PRUNE_THRESHOLD {
            cells.retain(|_, cell| cell.window == window);
        }

        let cell = cells.entry(key.to_string()).or_insert(RateCell {
            count: 0,
            window,
        });

        if cell.window != window {
            cell.window = window;
            cell.count = 0;
        }

        cell.count += 1;
        cell.count <= self.limit
    }
}

/// The admission gate applied to every inbound request.
pub struct SecurityGate {
    ip: Option<IpFilter>,
    rate: Option<RateLimiter>,
    query_filter: bool,
    max_body_bytes: Option<u64>,
}

impl SecurityGate {
    pub fn new(settings: &SecuritySettings) -> Self {
        let ip = settings.ip.as_ref().map(|ip| IpFilter {
            mode: ip.mode,
            allow: ip.allow.iter().cloned().collect(),
            deny: ip.deny.iter().cloned().collect(),
        });

        let rate = settings
            .rate
            .as_ref()
            .map(|r| RateLimiter::new(r.limit, r.window_s));

        Self {
            ip,
            rate,
            query_filter: settings.query_filter,
            max_body_bytes: settings.max_body_bytes,
        }
    }

    /// Runs all checks in order; the first failure is returned.
    pub fn check(&self, req: &HttpRequest) -> Result<(), ProxyError> {
        self.check_method(req.method())?;
        self.check_path(req.path())?;
        self.check_query(req.query_string())?;
        self.check_content_type(req)?;
        self.check_body_size(req)?;

        let client_ip = req
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        self.check_ip(req, &client_ip)?;
        self.check_rate(&client_ip)?;

        Ok(())
    }

    fn check_method(&self, method: &Method) -> Result<(), ProxyError> {
        if matches!(
            method.as_str(),
            "GET" | "POST" | "PUT" | "DELETE" | "OPTIONS" | "HEAD"
        ) {
            Ok(())
        } else {
            Err(ProxyError::MethodNotAllowed {
                method: method.to_string(),
            })
        }
    }

    fn check_path(&self, path: &str) -> Result<(), ProxyError> {
        if path.contains("..") || path.contains("//") {
            return Err(ProxyError::InvalidPath);
        }
        Ok(())
    }

    fn check_query(&self, query: &str) -> Result<(), ProxyError> {
        if !self.query_filter || query.is_empty() {
            return Ok(());
        }

        for pair in query.split('&') {
            let value = pair.split_once('=').map(|(_, v)| v).unwrap_or("");
            if QUERY_NEEDLES.iter().any(|needle| value.contains(needle)) {
                return Err(ProxyError::InvalidQuery);
            }
        }
        Ok(())
    }

    fn check_content_type(&self, req: &HttpRequest) -> Result<(), ProxyError> {
        if !matches!(req.method(), &Method::POST | &Method::PUT) {
            return Ok(());
        }

        let Some(raw) = req.headers().get(actix_web::http::header::CONTENT_TYPE) else {
            return Ok(());
        };
        let Ok(content_type) = raw.to_str() else {
            return Err(ProxyError::UnsupportedMediaType {
                content_type: "<invalid>".to_string(),
            });
        };

        let family = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        if ALLOWED_CONTENT_TYPES
            .iter()
            .any(|allowed| family.starts_with(allowed))
        {
            Ok(())
        } else {
            Err(ProxyError::UnsupportedMediaType {
                content_type: family,
            })
        }
    }

    fn check_body_size(&self, req: &HttpRequest) -> Result<(), ProxyError> {
        let Some(limit) = self.max_body_bytes else {
            return Ok(());
        };

        if let Some(raw) = req.headers().get(actix_web::http::header::CONTENT_LENGTH) {
            if let Some(length) = raw.to_str().ok().and_then(|s| s.parse::<u64>().ok()) {
                if length > limit {
                    warn!(
                        "Rejecting oversized payload: {} bytes (limit {})",
                        length, limit
                    );
                    return Err(ProxyError::PayloadTooLarge);
                }
            }
        }
        Ok(())
    }

    fn check_ip(&self, req: &HttpRequest, client_ip: &str) -> Result<(), ProxyError> {
        let Some(filter) = &self.ip else {
            return Ok(());
        };

        let blocked = match filter.mode {
            IpFilterMode::AllowList => !filter.allow.contains(client_ip),
            IpFilterMode::DenyList => filter.deny.contains(client_ip),
        };

        if blocked {
            warn!(
                "Blocked client {} on {} {}",
                client_ip,
                req.method(),
                req.path()
            );
            return Err(ProxyError::AccessDenied);
        }
        Ok(())
    }

    fn check_rate(&self, client_ip: &str) -> Result<(), ProxyError> {
        let Some(limiter) = &self.rate else {
            return Ok(());
        };

        if limiter.admit(client_ip) {
            Ok(())
        } else {
            Err(ProxyError::RateLimited)
        }
    }
}
