//! Courier notification server binary
//!
//! Loads configuration, wires up the delivery engine and serves the HTTP API
//! with graceful shutdown on SIGTERM or ctrl-c.

use anyhow::Context;
use clap::{Arg, Command};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use courier_notification::{create_router, EngineConfig, NotificationService, SERVICE_NAME, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let matches = Command::new(SERVICE_NAME)
        .version(VERSION)
        .about("Notification delivery and resilience engine")
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Bind address (overrides configuration)"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .value_name("PORT")
                .help("Bind port (overrides configuration)"),
        )
        .arg(
            Arg::new("workers")
                .long("workers")
                .value_name("COUNT")
                .help("Worker tasks per channel (overrides configuration)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .help("Log level filter (trace, debug, info, warn, error)"),
        )
        .get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    init_tracing(log_level)?;

    info!(service = SERVICE_NAME, version = VERSION, "starting");

    let mut config = EngineConfig::from_env().context("failed to load configuration")?;
    if let Some(host) = matches.get_one::<String>("host") {
        config.server.host = host.clone();
    }
    if let Some(port) = matches.get_one::<String>("port") {
        config.server.port = port.parse().context("invalid --port value")?;
    }
    if let Some(workers) = matches.get_one::<String>("workers") {
        config.dispatch.workers_per_channel =
            workers.parse().context("invalid --workers value")?;
    }
    config.validate().context("invalid configuration")?;

    let address = config.server_address();
    let service = NotificationService::new(config).context("failed to build the engine")?;
    service.start();
    spawn_maintenance(service.clone());

    let router = create_router(service.clone());
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    info!(address = %address, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("server error")?;

    service.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", log_level)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;
    Ok(())
}

/// Periodic housekeeping: evict expired rate-limit windows
fn spawn_maintenance(service: Arc<NotificationService>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let evicted = service.sweep_rate_windows();
            if evicted > 0 {
                info!(evicted, "evicted expired rate-limit windows");
            }
        }
    });
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("ctrl-c received, shutting down"),
        _ = terminate => warn!("SIGTERM received, shutting down"),
    }
}
