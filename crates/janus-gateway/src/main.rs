//! Janus Reverse Proxy Server
//!
//! Binary entry point: loads and validates configuration, wires the
//! balancer, circuit breakers, security gate and protocol forwarders
//! together, and starts the HTTP server.

use janus_rs::config::settings::load_settings;
use janus_rs::logs::logger::configure_logger;
use janus_rs::middleware::security::security_headers;
use janus_rs::models::settings::Settings;
use janus_rs::routes::metrics::ProxyMetrics;
use janus_rs::routes::{health, metrics, proxy};
use janus_rs::services::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerRegistry, FanoutSink,
};
use janus_rs::services::gate::SecurityGate;
use janus_rs::services::http::HttpForwarder;
use janus_rs::services::load_balancer::{
    AvailabilityBridge, BackendRegistry, LoadBalancerFactory,
};
use janus_rs::services::sse::SseForwarder;
use janus_rs::services::websocket::WebSocketForwarder;

use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let config: Settings = load_settings().expect("Failed to load settings");

    info!(
        "Starting Janus reverse proxy v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }
    info!(
        "Configuration validated, fronting {} backends with {:?} balancing",
        config.backends.len(),
        config.balancer.strategy
    );

    let registry = Arc::new(BackendRegistry::new(config.backends.clone()));
    let balancer =
        match LoadBalancerFactory::create(config.balancer.strategy, Arc::clone(&registry)) {
            Ok(balancer) => balancer,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        };

    let metrics_collector = ProxyMetrics::default();

    // Breaker transitions feed the metrics counters and drive availability
    // bits, including the timed re-enable that lets a probe through after
    // the open dwell.
    let sink = Arc::new(FanoutSink::new(vec![
        Arc::new(metrics_collector.clone()),
        Arc::new(AvailabilityBridge::new(
            Arc::clone(&balancer),
            Duration::from_millis(config.breaker.open_duration_ms),
        )),
    ]));
    let breakers = Arc::new(CircuitBreakerRegistry::new(
        CircuitBreakerConfig::from(&config.breaker),
        sink,
    ));

    let proxy_state = web::Data::new(proxy::ProxyState {
        gate: SecurityGate::new(&config.security),
        balancer,
        breakers: Arc::clone(&breakers),
        http: HttpForwarder::new(config.timeout_seconds),
        websocket: WebSocketForwarder::new(&config.websocket, config.timeout_seconds),
        sse: SseForwarder::new(&config.sse, config.timeout_seconds),
    });

    let host = std::env::var("JANUS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("JANUS_PORT")
        .unwrap_or_else(|_| "5900".to_string())
        .parse::<u16>()
        .unwrap_or(5900);

    info!("Starting server on {}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .app_data(proxy_state.clone())
            .app_data(web::Data::new(metrics_collector.clone()))
            .app_data(web::Data::from(Arc::clone(&breakers)))
            .wrap(Logger::new(
                r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %T"#,
            ))
            .wrap(security_headers())
            .configure(health::configure_health)
            .configure(metrics::configure_metrics)
            .default_service(web::to(proxy::forward))
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
