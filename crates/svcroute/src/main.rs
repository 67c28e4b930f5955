//! mcrouter - message router for svcrun processes.

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use svcroute::RouterServer;
use svcrun::Config;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mcrouter")]
#[command(about = "Routes service messages between svcrun processes")]
struct Args {
    /// TOML file with a [router] section
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind to (overrides the config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides the config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();

    let config = match &args.config {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    let host = args.host.unwrap_or(config.router.host);
    let port = args.port.unwrap_or(config.router.port);

    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding {}:{}", host, port))?;
    info!("mcrouter listening on {}", listener.local_addr()?);

    let server = RouterServer::new();
    tokio::select! {
        result = server.serve(listener) => result.context("accept loop failed")?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received, exiting");
        }
    }
    Ok(())
}
