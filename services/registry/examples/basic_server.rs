//! Basic OCI registry server example
//!
//! Run with: cargo run -p registry --example basic_server

use registry::RegistryBuilder;
use registry::sweep::ExpirySweeper;
use storage::MemoryStorage;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let storage = MemoryStorage::with_buckets(&["registry"]);
    let registry = RegistryBuilder::new()
        .storage(storage.into())
        .bucket("registry")
        .build();

    // Reclaim abandoned uploads in the background.
    let shutdown = CancellationToken::new();
    let _sweeper = ExpirySweeper::new(registry.uploads().clone()).spawn(shutdown.clone());

    let addr = "127.0.0.1:5000";
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("OCI Registry listening on http://{}", addr);
    tracing::info!("Try: curl http://{}/v2/", addr);

    axum::serve(listener, registry.into_router()).await?;
    shutdown.cancel();

    Ok(())
}
