use serde::{Deserialize, Serialize};

/// A single upstream origin server the proxy can forward to.
///
/// Origins are created once at startup from configuration and never change
/// afterwards. The only mutable piece of per-origin state, the availability
/// bit, lives in the backend registry rather than here.
///
/// # Examples
///
/// ```json
/// {
///   "id": "b1",
///   "url": "http://127.0.0.1:9001",
///   "weight": 1,
///   "health_check_path": "/health"
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Backend {
    /// Stable identifier, unique within the configured pool.
    /// Used as the key for availability bits and circuit breakers.
    pub id: String,

    /// Absolute base URL including protocol (http:// or https://),
    /// authority and an optional base path.
    pub url: String,

    /// Weight for weighted load balancing (default: 1).
    /// Reserved; the round-robin and random strategies ignore it.
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Optional health check path for this origin. Reserved for an
    /// external prober; the proxy itself never calls it.
    #[serde(default)]
    pub health_check_path: Option<String>,
}

fn default_weight() -> u32 {
    1
}

impl Backend {
    /// Validates origin configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Backend id must not be empty".to_string());
        }

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(format!(
                "Backend url must start with http:// or https://: {}",
                self.url
            ));
        }

        if self.weight == 0 {
            return Err("Backend weight must be greater than 0".to_string());
        }

        if let Some(path) = &self.health_check_path {
            if !path.starts_with('/') {
                return Err("Backend health_check_path must start with '/'".to_string());
            }
        }

        Ok(())
    }

    /// Base URL without a trailing slash, ready for path concatenation.
    pub fn base(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Whether the origin is reached over TLS.
    pub fn is_tls(&self) -> bool {
        self.url.starts_with("https://")
    }
}
