mod config;
mod connection;
mod error;
mod identifier;
mod mcp;
mod mongo_store;
mod ordering;
mod stats;
mod store;
#[cfg(test)]
mod testing;
mod tools;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use connection::ConnectionRegistry;
use mongo_store::MongoConnector;

/// A Model Context Protocol (MCP) server for administering `MongoDB` deployments.
///
/// Keeps a registry of named connections and reports databases, collections and
/// their storage statistics. It communicates via JSON-RPC 2.0 over stdin/stdout.
#[derive(Parser)]
#[command(name = "mongo-admin-rs")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "MCP server for MongoDB administration: connections, database stats, document lookup", long_about = None)]
struct Cli {
    /// Path to the configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mongo_admin_rs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = config::Config::load(cli.config.as_deref())?;
    match &cli.config {
        Some(path) => tracing::info!("Configuration loaded from {:?}", path),
        None => tracing::info!(
            "Configuration loaded from {:?}",
            config::Config::config_file()?
        ),
    }

    tracing::info!("Configured connections: {}", config.connections.len());

    let connector = MongoConnector::new(config.connect_timeout(), config.server_selection_timeout());
    let registry = Arc::new(ConnectionRegistry::new(Arc::new(connector)));

    // A connection that fails here can still be added later through add_connection
    for conn in &config.connections {
        if let Err(e) = registry
            .add_connection(&conn.name, &conn.connection_string, Some(conn.options.clone()))
            .await
        {
            tracing::warn!("Skipping connection '{}': {:#}", conn.name, anyhow::Error::new(e));
        }
    }

    let mcp_server = mcp::McpServer::new(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        registry,
        config.operation_timeout(),
        CancellationToken::new(),
    );
    mcp_server.run().await?;

    Ok(())
}
