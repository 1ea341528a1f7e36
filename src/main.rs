//! dispatch-lb: HTTP load balancer with health checks, circuit breaking and
//! per-client rate limiting.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use dispatch_lb::config::load_config;
use dispatch_lb::lifecycle::{signals, Shutdown};
use dispatch_lb::observability::logging;
use dispatch_lb::observability::metrics::init_metrics;
use dispatch_lb::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "dispatch-lb", version, about = "HTTP load balancer")]
struct Cli {
    /// Configuration file (`.json`, otherwise parsed as TOML)
    #[arg(short, long, default_value = "config/config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dispatch-lb starting");
    tracing::info!(
        path = %cli.config.display(),
        bind_address = %config.listener.bind_address,
        tls = config.listener.tls.is_some(),
        strategy = %config.strategy,
        backends = config.backends.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        init_metrics(addr)?;
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server = HttpServer::new(config)?;
    shutdown.trigger_on(signals::wait_for_signal());

    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
