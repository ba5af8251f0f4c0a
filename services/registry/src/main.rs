//! Registry server binary.
//!
//! Serves the registry HTTP routes and runs the upload expiry sweeper until
//! interrupted.

use std::net::SocketAddr;

use camino::Utf8PathBuf;
use clap::Parser;
use registry::RegistryBuilder;
use registry::config::RegistryConfig;
use registry::sweep::ExpirySweeper;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// OCI container registry server
#[derive(Parser, Debug)]
#[command(name = "registry-server", about = "OCI container registry server")]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long, short)]
    config: Option<Utf8PathBuf>,

    /// Address to listen on, overriding the configuration.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = match &args.config {
        Some(path) => RegistryConfig::load(path).await?,
        None => RegistryConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let storage = config.storage.clone().build().await?;
    let registry = RegistryBuilder::from_config(&config).storage(storage).build();

    let shutdown = CancellationToken::new();
    let sweeper = ExpirySweeper::new(registry.uploads().clone()).spawn(shutdown.clone());

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    tracing::info!(addr = %config.listen, bucket = %config.bucket, "OCI registry listening");

    let signal = shutdown.clone();
    axum::serve(listener, registry.into_router())
        .with_graceful_shutdown(async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!(%error, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    sweeper.await?;
    Ok(())
}
