//! Error taxonomy for the request plane.
//!
//! Every error is contained within a single exchange and rendered as a
//! short, neutral JSON body. Admission and selection errors never touch a
//! circuit breaker; upstream transport errors are counted as breaker
//! failures by the forwarder that observed them.

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Admission: HTTP method outside the allow-list.
    #[error("Method not allowed: {method}")]
    MethodNotAllowed { method: String },

    /// Admission: path contains traversal or duplicate-slash sequences.
    #[error("Invalid path")]
    InvalidPath,

    /// Admission: a query parameter value failed the injection heuristic.
    #[error("Invalid query parameter")]
    InvalidQuery,

    /// Admission: client address rejected by the IP filter.
    #[error("Access denied")]
    AccessDenied,

    /// Admission: request body media type outside the accepted families.
    #[error("Unsupported content type: {content_type}")]
    UnsupportedMediaType { content_type: String },

    /// Admission: declared payload size exceeds the configured cap.
    #[error("Request payload too large")]
    PayloadTooLarge,

    /// Admission: client exceeded its request budget for the window.
    #[error("Too many requests")]
    RateLimited,

    /// Selection: the available origin set is empty.
    #[error("No available backend")]
    NoAvailableBackend,

    /// Gate: the origin's circuit breaker is open.
    #[error("Service temporarily unavailable")]
    CircuitOpen { backend: String },

    /// Upstream transport failure: dial, DNS, reset before status line, or
    /// an I/O error mid-exchange.
    #[error("Upstream error: {message}")]
    Upstream { message: String, url: String },

    /// Upstream did not produce response headers within the deadline.
    #[error("Upstream timeout after {timeout}s")]
    Timeout { timeout: u64 },

    /// Anything unexpected. Logged at error level, rendered generically.
    #[error("Internal server error")]
    Internal { message: String },
}

impl ProxyError {
    fn kind(&self) -> &'static str {
        match self {
            ProxyError::MethodNotAllowed { .. } => "method_not_allowed",
            ProxyError::InvalidPath => "invalid_path",
            ProxyError::InvalidQuery => "invalid_query",
            ProxyError::AccessDenied => "access_denied",
            ProxyError::UnsupportedMediaType { .. } => "unsupported_media_type",
            ProxyError::PayloadTooLarge => "payload_too_large",
            ProxyError::RateLimited => "rate_limited",
            ProxyError::NoAvailableBackend => "no_available_backend",
            ProxyError::CircuitOpen { .. } => "circuit_open",
            ProxyError::Upstream { .. } => "upstream",
            ProxyError::Timeout { .. } => "timeout",
            ProxyError::Internal { .. } => "internal",
        }
    }
}

impl actix_web::error::ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::InvalidPath | ProxyError::InvalidQuery => StatusCode::BAD_REQUEST,
            ProxyError::AccessDenied => StatusCode::FORBIDDEN,
            ProxyError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ProxyError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::NoAvailableBackend | ProxyError::CircuitOpen { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::Upstream { .. } | ProxyError::Timeout { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Bodies stay short and neutral; internal detail goes to the log,
        // never to the client.
        let message = match self {
            ProxyError::Internal { .. } => "Internal server error".to_string(),
            ProxyError::Upstream { .. } => "Bad gateway".to_string(),
            ProxyError::CircuitOpen { .. } => "Service temporarily unavailable".to_string(),
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": message,
            "type": self.kind()
        }))
    }
}
