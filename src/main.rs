//! Binary entry point: bridge configured MCP tool servers into a
//! `run_code` tool served over stdio.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use toolbridge::{BridgeConfig, Executor, RunCodeServer, ToolRegistry};

#[derive(Parser)]
#[command(
    name = "toolbridge",
    version,
    about = "Serve a run_code tool that bridges MCP tool servers into Rhai scripts"
)]
struct Cli {
    /// Path to the tool server configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Restrict bridged tools to these names (repeatable)
    #[arg(long = "tool")]
    tools: Vec<String>,

    /// Print execution progress to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the MCP frames, so all logging goes to stderr
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = BridgeConfig::from_path(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let mut registry = ToolRegistry::connect(&config).await;
    if !cli.tools.is_empty() {
        registry = registry.with_tool_filter(cli.tools.clone());
    }
    if registry.is_empty() {
        warn!("no tool servers connected; scripts will run without bridged tools");
    }

    let executor = Executor::new(Arc::new(registry.catalog())).verbose(cli.verbose);
    let server = RunCodeServer::new(executor);

    info!(servers = registry.len(), "serving run_code over stdio");
    let served = async {
        let service = server.serve(stdio()).await?;
        service.waiting().await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    // connections are released even when serving ended in an error
    registry.shutdown().await;
    served
}
