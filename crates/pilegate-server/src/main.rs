//! Gateway server binary.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 0.0.0.0:8999, in-memory retry queue
//! pilegate-server
//!
//! # Production: config file with endpoints and a persistent retry queue
//! pilegate-server --config gateway.yaml
//! ```

use clap::Parser;
use pilegate_server::{Gateway, GatewayFileConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Charging-pile gateway server
#[derive(Parser, Debug)]
#[command(name = "pilegate-server")]
#[command(about = "DNY charging-pile gateway")]
#[command(version)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listener port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the bind interface
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let mut config = match &args.config {
        Some(path) => GatewayFileConfig::load(path)?,
        None => GatewayFileConfig::default(),
    };
    if let Some(port) = args.port {
        config.tcp.port = port;
    }
    if let Some(bind) = args.bind {
        config.tcp.bind = bind;
    }

    tracing::info!("gateway starting on {}", config.bind_addr());
    if config.notification.endpoints.is_empty() {
        tracing::warn!("no notification endpoints configured - events will not leave the gateway");
    }

    let gateway = Gateway::bind(&config).await?;
    let shutdown = gateway.shutdown_token();

    tokio::spawn(wait_for_signal(shutdown));

    gateway.run().await?;

    tracing::info!("gateway stopped");
    Ok(())
}

/// Initiate graceful shutdown on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::error!("cannot install SIGTERM handler: {}", e);
                let _ = ctrl_c.await;
                shutdown.cancel();
                return;
            },
        };

        tokio::select! {
            _ = ctrl_c => tracing::info!("SIGINT received"),
            _ = sigterm.recv() => tracing::info!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("SIGINT received");
    }

    shutdown.cancel();
}
