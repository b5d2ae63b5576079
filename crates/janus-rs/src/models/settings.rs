use crate::models::backend::Backend;
use serde::{Deserialize, Serialize};

/// Load balancing strategy for distributing requests across the origin pool.
///
/// Only `RoundRobin` and `Random` are implemented. The remaining variants
/// are accepted by the parser for forward compatibility but rejected at
/// startup by the balancer factory. Names outside this set fail parsing.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BalancerStrategy {
    /// Cycle through available origins in order (default).
    RoundRobin,

    /// Pick a uniformly random available origin.
    Random,

    /// Reserved. Weighted distribution by origin weight.
    Weighted,

    /// Reserved. Fewest in-flight requests wins.
    LeastConnections,
}

impl Default for BalancerStrategy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

/// Balancer configuration group.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct BalancerSettings {
    #[serde(default)]
    pub strategy: BalancerStrategy,
}

/// Circuit breaker configuration group.
///
/// One breaker per origin is created lazily with these parameters.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u64,

    /// Minimum dwell in the open state before a probe is allowed, in
    /// milliseconds.
    #[serde(default = "default_open_duration_ms")]
    pub open_duration_ms: u64,
}

fn default_failure_threshold() -> u64 {
    50
}

fn default_open_duration_ms() -> u64 {
    60_000
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_duration_ms: default_open_duration_ms(),
        }
    }
}

/// Interpretation of the IP filter lists.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IpFilterMode {
    /// Only addresses in `allow` may pass.
    AllowList,
    /// Addresses in `deny` are rejected, everything else passes.
    DenyList,
}

/// IP allow/deny filter configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IpFilterSettings {
    pub mode: IpFilterMode,

    #[serde(default)]
    pub allow: Vec<String>,

    #[serde(default)]
    pub deny: Vec<String>,
}

/// Fixed-window rate limit, keyed by client IP.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RateLimitSettings {
    /// Requests admitted per window per client.
    pub limit: u64,

    /// Window length in seconds. Windows are fixed, not sliding.
    pub window_s: u64,
}

/// Security gate configuration group.
///
/// Any absent sub-group disables the corresponding check.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SecuritySettings {
    /// IP allow/deny filtering. Absent means all client addresses pass.
    #[serde(default)]
    pub ip: Option<IpFilterSettings>,

    /// Per-client rate limiting. Absent disables the check.
    #[serde(default)]
    pub rate: Option<RateLimitSettings>,

    /// Reject query parameter values containing quote, semicolon or SQL
    /// comment sequences. Deliberately crude; disable if it breaks
    /// legitimate clients.
    #[serde(default = "default_true")]
    pub query_filter: bool,

    /// Maximum request payload size in bytes, judged from Content-Length.
    /// Absent disables the check.
    #[serde(default)]
    pub max_body_bytes: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            ip: None,
            rate: None,
            query_filter: true,
            max_body_bytes: None,
        }
    }
}

/// WebSocket keepalive configuration group.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WebSocketSettings {
    /// Interval between server-side ping frames, in milliseconds.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Idle time after which the connection is closed, in milliseconds.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_ping_interval_ms() -> u64 {
    30_000
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

/// Server-sent events configuration group.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SseSettings {
    /// Reconnect hint sent to the client as the initial `retry:` directive,
    /// in milliseconds.
    #[serde(default = "default_retry_hint_ms")]
    pub retry_hint_ms: u64,

    /// How often a comment heartbeat is written when the upstream is quiet,
    /// in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

fn default_retry_hint_ms() -> u64 {
    3_000
}

fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

impl Default for SseSettings {
    fn default() -> Self {
        Self {
            retry_hint_ms: default_retry_hint_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

/// Complete proxy configuration as loaded from the config file.
///
/// # Configuration File Format
///
/// ```json
/// {
///   "version": 1,
///   "backends": [
///     { "id": "b1", "url": "http://127.0.0.1:9001" },
///     { "id": "b2", "url": "http://127.0.0.1:9002" }
///   ],
///   "balancer": { "strategy": "round-robin" },
///   "breaker": { "failure_threshold": 50, "open_duration_ms": 60000 },
///   "security": {
///     "ip": { "mode": "deny-list", "deny": ["203.0.113.9"] },
///     "rate": { "limit": 100, "window_s": 60 }
///   },
///   "websocket": { "ping_interval_ms": 30000, "idle_timeout_ms": 60000 },
///   "sse": { "retry_hint_ms": 3000, "heartbeat_interval_ms": 15000 }
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    /// Configuration schema version for compatibility checking.
    pub version: u8,

    /// The fixed origin pool. At least one origin is required.
    pub backends: Vec<Backend>,

    #[serde(default)]
    pub balancer: BalancerSettings,

    #[serde(default)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    pub security: SecuritySettings,

    #[serde(default, alias = "ws")]
    pub websocket: WebSocketSettings,

    #[serde(default)]
    pub sse: SseSettings,

    /// Upstream dial and headers timeout in seconds. The streaming phase of
    /// an exchange is bounded only by peer liveness.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

impl Settings {
    /// Validates the whole configuration before the proxy starts.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: an empty pool, duplicate origin
    /// ids, malformed origin URLs, or zero-valued policy knobs.
    pub fn validate(&self) -> Result<(), String> {
        if self.backends.is_empty() {
            return Err("At least one backend must be configured".to_string());
        }

        let mut seen = ahash::AHashSet::with_capacity(self.backends.len());
        for backend in &self.backends {
            backend
                .validate()
                .map_err(|e| format!("Backend '{}': {}", backend.id, e))?;
            if !seen.insert(backend.id.as_str()) {
                return Err(format!("Duplicate backend id '{}'", backend.id));
            }
        }

        if self.breaker.failure_threshold == 0 {
            return Err("breaker.failure_threshold must be greater than 0".to_string());
        }
        if self.breaker.open_duration_ms == 0 {
            return Err("breaker.open_duration_ms must be greater than 0".to_string());
        }

        if let Some(rate) = &self.security.rate {
            if rate.limit == 0 {
                return Err("security.rate.limit must be greater than 0".to_string());
            }
            if rate.window_s == 0 {
                return Err("security.rate.window_s must be greater than 0".to_string());
            }
        }

        if self.websocket.ping_interval_ms == 0 {
            return Err("websocket.ping_interval_ms must be greater than 0".to_string());
        }
        if self.websocket.idle_timeout_ms == 0 {
            return Err("websocket.idle_timeout_ms must be greater than 0".to_string());
        }
        if self.sse.heartbeat_interval_ms == 0 {
            return Err("sse.heartbeat_interval_ms must be greater than 0".to_string());
        }

        Ok(())
    }
}
