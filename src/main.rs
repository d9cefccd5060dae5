use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::{LogFormat, LoggingConfig, TollgateConfig};
use tollgate::http::HttpServer;
use tollgate::ratelimit::{AdmissionFilter, IdleReaper, LimiterRegistry};

/// Per-client request admission control service.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address of the admission check endpoint
    #[arg(long, value_name = "ADDR")]
    http_addr: Option<SocketAddr>,

    /// Address of the admin endpoint
    #[arg(long, value_name = "ADDR")]
    admin_addr: Option<SocketAddr>,

    /// Admit every request without rate limiting
    #[arg(long)]
    disable_rate_limiting: bool,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TollgateConfig::load(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting Tollgate Admission Control Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &cli.config {
        info!(path = %path.display(), "Loaded configuration file");
    }
    info!(
        http_addr = %config.server.http_addr,
        admin_addr = %config.server.admin_addr,
        enabled = config.rate_limiting.enabled,
        requests_per_second = config.rate_limiting.requests_per_second,
        burst_size = config.rate_limiting.burst_size,
        "Configuration loaded"
    );

    // The registry is shared by the filter and the reaper
    let registry = Arc::new(LimiterRegistry::new());
    let filter = AdmissionFilter::new(&config.rate_limiting, Arc::clone(&registry))?;
    let reaper = IdleReaper::from_config(registry, &config.rate_limiting).spawn();
    info!("Rate limiter initialized");

    let server = HttpServer::new(&config.server, filter);
    let result = server.serve_with_shutdown(shutdown_signal()).await;

    reaper.shutdown().await;
    result?;

    info!("Tollgate Admission Control Service stopped");
    Ok(())
}

fn apply_overrides(config: &mut TollgateConfig, cli: &Cli) {
    if let Some(addr) = cli.http_addr {
        config.server.http_addr = addr;
    }
    if let Some(addr) = cli.admin_addr {
        config.server.admin_addr = addr;
    }
    if cli.disable_rate_limiting {
        config.rate_limiting.enabled = false;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
