pub mod circuit_breaker;
pub mod gate;
pub mod http;
pub mod load_balancer;
pub mod sse;
pub mod websocket;
