// Standalone MCP server binary

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use switchboard_mcp::protocol::ServerInfo;
use switchboard_mcp::{ConnectorRegistry, HostConfig, McpServer};

#[derive(Parser, Debug)]
#[command(name = "switchboard-mcp")]
#[command(about = "Serve Switchboard connectors to MCP clients over stdio", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "switchboard.toml", env = "SWITCHBOARD_CONFIG")]
    config: PathBuf,

    /// Print every available tool as JSON and exit
    #[arg(long)]
    list_tools: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = HostConfig::load(&args.config)?;
    let registry = ConnectorRegistry::from_config(&config)
        .await
        .context("Failed to register connectors")?;

    let tools = registry.list_tools().await;
    tracing::info!("Registered {} tools", tools.len());

    if args.list_tools {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    let server = McpServer::new(
        registry,
        ServerInfo {
            name: config.server.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    );
    server.run_stdio().await?;

    Ok(())
}
