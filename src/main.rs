//! Proxyman - Entry Point
//!
//! Starts the forward proxy gateway with graceful shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use proxyman::config::LogConfig;
use proxyman::proxy::{
    BasicAuthStore, HyperTransportFactory, MemoryProxyPool, ProxyHandler, ProxyHandlerConfig,
    ProxyPool, ProxyServer,
};
use proxyman::{Config, GatewayContext};

#[tokio::main]
async fn main() -> proxyman::Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting Proxyman");

    // Load upstream proxies into the pool
    let pool = Arc::new(MemoryProxyPool::new(config.pool.rotation_strategy));
    pool.refresh_from_urls(config.pool.upstreams.as_slice())?;
    if pool.available_count() == 0 {
        warn!("No upstream proxies configured; every request will fail");
    }
    info!(
        "Loaded {} proxies, rotation strategy: {}",
        pool.available_count(),
        pool.strategy().as_str()
    );

    let auth = Arc::new(BasicAuthStore::new(
        config.auth.enabled,
        config.auth.users.clone(),
    ));
    if auth.is_enabled() {
        info!("Proxy authentication enabled");
    }

    let handler_config = ProxyHandlerConfig::from(&config.proxy);
    info!(
        "Retry bound {} attempts, timeout {:?}",
        handler_config.max_attempts(),
        handler_config.timeout
    );

    let handler = Arc::new(ProxyHandler::new(
        pool,
        auth,
        Arc::new(HyperTransportFactory),
        Arc::new(GatewayContext::new()),
        handler_config,
    ));
    let proxy_server = ProxyServer::new(config.proxy.clone(), handler);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let proxy_task = tokio::spawn(async move {
        if let Err(e) = proxy_server.run(shutdown_rx).await {
            error!("Proxy server error: {}", e);
        }
    });

    info!("Server started - Proxy: {}", config.proxy_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = proxy_task.await;

    info!("Proxyman stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxyman={}", log.level).into());
    let json = log.format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
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
}
