//! # Janus-rs Reverse Proxy
//!
//! An async reverse proxy built with Rust and Actix Web that fronts a fixed
//! pool of origin servers. Janus-rs handles plain HTTP, WebSocket and
//! server-sent-events traffic, balancing requests across available origins
//! and shielding them with per-origin circuit breakers.
//!
//! ## Request Pipeline
//!
//! ```text
//! ┌──────────┐    ┌──────────────────────────────┐    ┌──────────────┐
//! │  Client  │───▶│          Janus-rs            │───▶│   Origins    │
//! │          │    │                              │    │              │
//! └──────────┘    │  ┌───────────────────────────┤    └──────────────┘
//!                 │  │ Security gate             │
//!                 │  ├───────────────────────────┤
//!                 │  │ Load balancer             │
//!                 │  ├───────────────────────────┤
//!                 │  │ Circuit breaker           │
//!                 │  ├───────────────────────────┤
//!                 │  │ HTTP / WebSocket / SSE    │
//!                 │  └───────────────────────────┘
//!                 └──────────────────────────────┘
//! ```
//!
//! Each inbound request is admitted by the security gate (method, path and
//! query sanity, IP filtering, rate limiting), dispatched to a protocol
//! adapter by its upgrade or `Accept` header, routed to an available origin
//! and executed under that origin's circuit breaker. Request and response
//! bodies stream end to end; WebSocket frames are spliced by two
//! back-pressured pumps and SSE relays inject a retry hint and periodic
//! heartbeats.
//!
//! ## Module Organization
//!
//! - **[`config`]** - configuration loading and environment substitution
//! - **[`models`]** - origin pool, policy settings and the error taxonomy
//! - **[`services`]** - balancing, breaking, admission and the forwarders
//! - **[`routes`]** - the proxy entry point plus health and metrics
//! - **[`middleware`]** - response header middleware
//! - **[`logs`]** - logging configuration
//! - **[`utils`]** - URL assembly helpers
//!
//! ## Environment Variables
//!
//! - `JANUS_CONFIG_PATH`: configuration file path (default: `./config.json`)
//! - `JANUS_HOST`: server bind address (default: `0.0.0.0`)
//! - `JANUS_PORT`: server port (default: `5900`)
//! - `NO_COLOR`: disable colored log output
//!
//! Placeholders of the form `${VAR}` inside the configuration file are
//! expanded from the environment before parsing, which is the supported way
//! to override origin URLs per deployment.

pub mod config;
pub mod logs;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;
