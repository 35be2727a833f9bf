//! relctx-mcp server entry point.
//!
//! This is the main binary that boots the MCP server on stdio transport and
//! hosts the background job scheduler.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use relctx_core::{AppConfig, ContextDb, ContextService};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = Arc::new(AppConfig::load().context("loading configuration")?);
    let db = ContextDb::open(&config.db_path)
        .await
        .with_context(|| format!("opening database at {}", config.db_path.display()))?
        .with_compression(config.compression);

    tracing::info!(
        db_path = %config.db_path.display(),
        compression = config.compression.as_str(),
        scheduler = config.scheduler_enabled,
        "Starting relctx server on stdio transport"
    );

    let service = ContextService::new(db, Arc::clone(&config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = config
        .scheduler_enabled
        .then(|| service.jobs().spawn_scheduler(shutdown_rx));

    let handler = handler::ContextServer::new(service);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    tokio::select! {
        quit = server.waiting() => { quit?; }
        _ = tokio::signal::ctrl_c() => tracing::info!("Received interrupt, shutting down"),
    }

    let _ = shutdown_tx.send(true);
    if let Some(scheduler) = scheduler {
        scheduler.await.context("joining job scheduler")?;
    }

    Ok(())
}
