// src/main.rs
use anyhow::{Context, Result};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, Server};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info};

use api_gateway::{
    cache::create_cache_store,
    config::{self, Config},
    gateway::{Gateway, GatewayContext},
    health::HealthAggregator,
    metrics::{MetricsRegistry, Telemetry},
    middleware::{FixedWindowRateLimiter, JwtAuthenticator},
    proxy::{BackendRegistry, HttpForwarder},
    response,
    server::{RequestHandler, ServerBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_gateway=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "gateway.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path)?;
    log_effective_config(&config);

    // Initialize metrics
    let metrics_registry = MetricsRegistry::new()?;
    let metrics = metrics_registry.collector();

    let registry = BackendRegistry::new(config.services.descriptors())
        .context("Invalid backend registry")?;

    let cache = create_cache_store(&config.cache, &config.redis).await;
    let rate_limiter = Arc::new(FixedWindowRateLimiter::new());
    let forwarder = Arc::new(HttpForwarder::new(
        registry.clone(),
        config.forwarding.timeout(),
    )?);
    let health = Arc::new(HealthAggregator::new(
        registry.clone(),
        config.health.timeout(),
        Some(metrics.clone()),
    )?);

    let gateway = Arc::new(Gateway::new(GatewayContext {
        registry,
        cache: cache.clone(),
        forwarder,
        rate_limiter: rate_limiter.clone(),
        telemetry: Arc::new(Telemetry::new(Some(metrics))),
        authenticator: Arc::new(JwtAuthenticator::new(&config.auth.jwt_secret)),
        health,
        cache_ttl: config.cache.ttl(),
        rate_limit: config.rate_limit.clone(),
    }));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start metrics server if enabled
    if config.metrics.enabled {
        let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        start_metrics_server(metrics_addr, metrics_registry, shutdown_rx.clone())?;
    }

    // Periodic sweep of expired cache entries and idle rate limit windows
    {
        let cache = cache.clone();
        let rate_limiter = rate_limiter.clone();
        let window = config.rate_limit.window();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let entries = cache.purge_expired();
                        let clients = rate_limiter.purge_idle(window);
                        debug!(entries, clients, "Purged expired state");
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
    }

    info!("Starting gateway on {}", config.server.listen_addr);

    ServerBuilder::new(config.server.listen_addr)
        .with_handler(RequestHandler::new(gateway))
        .serve_with_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    cache.shutdown().await;
    info!("Gateway stopped");

    Ok(())
}

fn log_effective_config(config: &Config) {
    info!(
        jwt_secret = %config.auth.redacted_secret(),
        user_service = %config.services.user,
        order_service = %config.services.order,
        product_service = %config.services.product,
        redis_host = %config.redis.host,
        redis_port = config.redis.port,
        cache_backend = ?config.cache.backend,
        cache_ttl_secs = config.cache.ttl_secs,
        "Effective configuration"
    );
}

fn start_metrics_server(
    addr: SocketAddr,
    registry: MetricsRegistry,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let registry = Arc::new(registry);

    let make_service = hyper::service::make_service_fn(move |_| {
        let registry = registry.clone();

        async move {
            Ok::<_, Infallible>(hyper::service::service_fn(move |req: Request<Body>| {
                let registry = registry.clone();

                async move {
                    if req.uri().path() != "/metrics" {
                        return Ok::<_, Infallible>(response::not_found());
                    }
                    let mut metrics = Response::new(Body::from(registry.gather()));
                    metrics.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static("text/plain; version=0.0.4"),
                    );
                    Ok::<_, Infallible>(metrics)
                }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("Failed to bind metrics server on {}", addr))?
        .serve(make_service)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });

    info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
