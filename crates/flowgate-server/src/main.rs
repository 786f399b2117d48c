//! Flowgate API gateway server
//!
//! Fronts a fixed set of backend services under one API prefix:
//! - Dispatches `{api_prefix}/...` to the first service with a matching route
//! - Refuses traffic to services whose health probe or circuit breaker says no
//! - Retries failed upstream attempts with linear backoff
//! - Token-bucket rate limiting per caller, client IP or globally
//! - Bearer-token authentication with a skip list
//! - `/health` and Prometheus `/metrics`
//!
//! Usage:
//! ```bash
//! # Built-in defaults (auth + flowtime services)
//! FLOWGATE_JWT_SECRET=secret flowgate-server
//!
//! # With config file; env vars override it, CLI flags override both
//! flowgate-server --config gateway.yaml --port 9000
//!
//! # Validate a config file and exit
//! flowgate-server --config gateway.yaml check-config
//! ```

mod app;
mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::GatewayConfig;
use flowgate_observability::init_logging;
use flowgate_ratelimit::spawn_cleanup_task;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Flowgate - API gateway for backend services
#[derive(Parser)]
#[command(name = "flowgate-server")]
#[command(about = "Flowgate API gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (YAML or TOML)
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "FLOWGATE_CONFIG",
        global = true
    )]
    config: Option<String>,

    /// Address to bind
    #[arg(long, value_name = "HOST", global = true)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, value_name = "PORT", global = true)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (default if no command specified)
    Serve,
    /// Load and validate the configuration, then exit
    CheckConfig,
}

/// File (or built-in defaults), then environment, then CLI flags
fn load_config(cli: &Cli) -> anyhow::Result<GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => GatewayConfig::default(),
    };

    config.merge_env();

    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Some(Commands::CheckConfig) = cli.command {
        println!(
            "Configuration OK: {} service(s) under {}",
            config.services.len(),
            config.api_prefix
        );
        return Ok(());
    }

    init_logging(&config.logging).context("Failed to initialize logging")?;

    match &cli.config {
        Some(path) => info!("📁 Loaded configuration from: {}", path),
        None => info!("📁 Using default configuration"),
    }
    info!("🚀 Initializing Flowgate gateway");

    let gateway = app::build_gateway(&config)?;

    // One signal for every background task
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor = gateway.monitor;
    let monitor_shutdown = shutdown_rx.clone();
    let monitor_task = tokio::spawn(async move { monitor.run(monitor_shutdown).await });

    let cleanup_task = gateway.limiter.map(|limiter| {
        spawn_cleanup_task(
            limiter,
            config.rate_limit.cleanup_interval(),
            shutdown_rx.clone(),
        )
    });
    if cleanup_task.is_none() {
        info!("Rate limiting disabled");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let local_addr = listener.local_addr().context("Failed to read listener address")?;

    info!("");
    info!("✅ Flowgate listening on http://{}", local_addr);
    info!("   Services:");
    for service in &config.services {
        info!(
            "   - {} -> {} ({} route(s))",
            service.name,
            service.base_url,
            service.routes.len()
        );
    }
    info!("   Observability:");
    info!("   - Health check:       http://{}/health", local_addr);
    info!("   - Prometheus metrics: http://{}/metrics", local_addr);
    info!("");

    // Graceful shutdown gets a bounded grace period once the signal arrives
    let (signal_tx, signal_rx) = watch::channel(false);
    let server = axum::serve(
        listener,
        gateway
            .router
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(true);
    });

    let grace = config.timeouts.shutdown();
    let serve = server.into_future();
    tokio::pin!(serve);

    let mut signal_rx = signal_rx;
    let result = tokio::select! {
        result = &mut serve => result,
        _ = async {
            let _ = signal_rx.wait_for(|fired| *fired).await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out, dropping open connections"
            );
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor_task.await {
        error!("Health monitor task failed: {}", e);
    }
    if let Some(task) = cleanup_task
        && let Err(e) = task.await
    {
        error!("Rate limiter cleanup task failed: {}", e);
    }

    result.context("Server error")?;
    info!("Flowgate stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
