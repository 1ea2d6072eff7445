//! Docket - Agent
//!
//! Runs on every fleet host, accepts collection sessions from the controller
//! and streams diagnostics back as tar.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use docket_common::{LogConfig, init_logging};
use docketd::AgentContext;
use docketd::config::AgentConfig;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "docketd")]
#[command(author, version, about = "Docket agent - serves diagnostic collection sessions")]
struct Cli {
    /// Address to listen on
    #[arg(short, long)]
    listen: Option<IpAddr>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum concurrent collection sessions
    #[arg(long)]
    max_connections: Option<usize>,

    /// Maximum concurrent collection tasks
    #[arg(long)]
    max_tasks: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info").with_file_prefix("docketd.log");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let (mut config, problems) = AgentConfig::from_env();
    for problem in &problems {
        warn!("Ignoring bad configuration: {}", problem);
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(max) = cli.max_connections {
        config.max_connections = max.max(1);
    }
    if let Some(max) = cli.max_tasks {
        config.max_tasks = max.max(1);
    }

    let addr = SocketAddr::new(config.listen, config.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;
    info!(
        max_connections = config.max_connections,
        max_tasks = config.max_tasks,
        "docketd listening on {}",
        addr
    );

    let ctx = AgentContext::new(config);
    docketd::server::serve(listener, ctx, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await?;

    info!("docketd stopped");
    Ok(())
}
