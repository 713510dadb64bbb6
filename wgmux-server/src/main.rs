mod server;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use wgmux_core::config::load_server_config;
use wgmux_core::obfuscate::Obfuscator;
use wgmux_core::table::ForwardingTable;

#[derive(Parser)]
#[command(name = "wgmux-server", about = "Multiplexing forwarding proxy for WireGuard endpoints")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/wgmux/server.json5")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_server_config(&cli.config)?;

    let log_level = cli.log_level.as_deref().unwrap_or("warn");
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    tracing::info!("wgmux-server starting");

    let listen = Arc::new(tokio::net::UdpSocket::bind(config.listen).await?);
    tracing::info!(addr = %config.listen, "server listening");

    let obfuscator = Arc::new(Obfuscator::new(&config.user_key));
    let table = Arc::new(ForwardingTable::new(
        listen.clone(),
        obfuscator.clone(),
        config.timeout,
    ));

    let sweep_table = table.clone();
    let sweep_interval = (config.timeout / 4).max(std::time::Duration::from_secs(1));
    let sweep_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            sweep_table.sweep();
        }
    });

    let shutdown_table = table.clone();
    let run = server::run_listen_loop(listen, table, obfuscator, config.servers);

    tokio::select! {
        result = run => {
            if let Err(e) = result {
                tracing::error!(error = %e, "listen loop terminated");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    sweep_task.abort();
    // Cancel every forwarding entry's reader task and close its outbound
    // socket — closing the listen socket alone leaves them running forever.
    shutdown_table.shutdown();
    tracing::info!("wgmux-server stopped");
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
