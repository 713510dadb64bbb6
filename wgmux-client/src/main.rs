mod mangler;
mod relay;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use wgmux_core::config::{decode_key, load_client_config};

#[derive(Parser)]
#[command(name = "wgmux-client", about = "Client-leg relay and mangler for a wgmux server")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/wgmux/client.json5")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_client_config(&cli.config)?;

    let log_level = cli.log_level.as_deref().unwrap_or("warn");
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    tracing::info!("wgmux-client starting");

    let xor_key = config
        .xor_key
        .as_ref()
        .map(|k| decode_key(k))
        .transpose()?;
    let mangler = mangler::Mangler::new(config.id as u8, xor_key);

    let server_addr: SocketAddr = tokio::net::lookup_host(&config.server)
        .await?
        .next()
        .ok_or_else(|| format!("could not resolve server address {:?}", config.server))?;

    let listen = Arc::new(tokio::net::UdpSocket::bind(&config.listen).await?);
    tracing::info!(listen = %config.listen, server = %server_addr, "relay listening");

    let relay_handle = tokio::spawn(relay::run_relay(listen, server_addr, mangler));

    tokio::select! {
        result = relay_handle => {
            match result {
                Ok(Err(e)) => tracing::error!(error = %e, "relay task failed"),
                Err(e) => tracing::error!(error = %e, "relay task panicked"),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracing::info!("wgmux-client stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to setup SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => {},
        _ = sigterm.recv() => {},
    }
}
