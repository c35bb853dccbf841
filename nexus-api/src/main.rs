//! ContextNexus API server binary.

use anyhow::Result;
use clap::Parser;
use nexus_api::state::AppState;
use nexus_core::config::NexusConfig;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "nexus-api", about = "ContextNexus backend API server")]
struct Args {
    /// Bind host, overrides NEXUS_HOST
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overrides NEXUS_PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = NexusConfig::from_env()?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let host = config.host.clone();
    let port = config.port;
    let (state, _store) = AppState::standalone(config);

    nexus_api::server::serve(state, &host, port).await
}
