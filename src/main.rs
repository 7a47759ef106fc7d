//! tcpbridge - relay TCP connections over WebSocket tunnels
//!
//! Usage:
//!     tcpbridge --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use tcpbridge::config::{Config, load_config};
use tcpbridge::frontend::{TunnelListener, TunnelServer};
use tcpbridge::metrics::{MetricsCollector, MetricsServer};
use tcpbridge::util::{ShutdownSignal, init_logging};

/// Relay raw TCP connections over WebSocket tunnels, optionally through HTTP(S) proxies.
#[derive(Parser, Debug)]
#[command(name = "tcpbridge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);

    init_logging(log_level, &config.global.log_format).context("failed to initialize logging")?;

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Clients: {}", config.clients.len());
        for client in &config.clients {
            println!(
                "    - {} ({}) -> {} [{}]",
                client.name, client.listen, client.tunnel, client.method
            );
        }
        println!("  Servers: {}", config.servers.len());
        for server in &config.servers {
            let scheme = if server.tls.is_some() { "wss" } else { "ws" };
            println!("    - {} ({}://{})", server.name, scheme, server.listen);
        }
        return Ok(());
    }

    info!(
        config_path = %cli.config.display(),
        clients = config.clients.len(),
        servers = config.servers.len(),
        "tcpbridge starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let shutdown = ShutdownSignal::new();
    let metrics = MetricsCollector::new();
    let mut handles = Vec::new();

    // Bind everything before serving so a bad listener aborts startup.
    for client in &config.clients {
        let listener = TunnelListener::bind(client, metrics.clone())
            .await
            .with_context(|| format!("failed to start client '{}'", client.name))?;
        handles.push(tokio::spawn(listener.run(shutdown.subscribe())));
    }

    for server in &config.servers {
        let server_listener = TunnelServer::bind(server, metrics.clone())
            .await
            .with_context(|| format!("failed to start server '{}'", server.name))?;
        handles.push(tokio::spawn(server_listener.run(shutdown.subscribe())));
    }

    let metrics_config = &config.global.metrics;
    if metrics_config.enabled {
        let metrics_server = MetricsServer::bind(
            metrics_config.address,
            metrics_config.path.clone(),
            metrics.clone(),
        )
        .await
        .with_context(|| format!("failed to bind metrics server on {}", metrics_config.address))?;
        handles.push(tokio::spawn(metrics_server.run(shutdown.subscribe())));
    }

    shutdown.trigger_on_ctrl_c().await;

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "listener task failed");
        }
    }

    info!("tcpbridge shut down complete");
    Ok(())
}
