//! Upstream URL assembly helpers.

/// Builds the upstream HTTP URL for an exchange: origin base plus the
/// inbound path and query, both carried over verbatim.
pub fn upstream_url(base: &str, path: &str, query: &str) -> String {
    let base = base.trim_end_matches('/');
    if query.is_empty() {
        format!("{}{}", base, path)
    } else {
        format!("{}{}?{}", base, path, query)
    }
}

/// Builds the upstream WebSocket URL, translating the origin scheme:
/// `http` dials `ws`, `https` dials `wss`.
pub fn ws_upstream_url(base: &str, path: &str, query: &str) -> String {
    let (scheme, rest) = if let Some(rest) = base.strip_prefix("https://") {
        ("wss://", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        ("ws://", rest)
    } else {
        ("ws://", base)
    };

    let rest = rest.trim_end_matches('/');
    if query.is_empty() {
        format!("{}{}{}", scheme, rest, path)
    } else {
        format!("{}{}{}?{}", scheme, rest, path, query)
    }
}
