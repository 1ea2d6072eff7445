//! Docket - Controller
//!
//! Reads `<ip> <name> <instruction-file>` lines on stdin and writes the
//! combined tar stream of every host to stdout.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use docket::ControllerContext;
use docket::config::ControllerConfig;
use docket::manifest::run_manifest;
use docket_common::{LogConfig, init_logging};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "docket")]
#[command(author, version, about = "Docket controller - collects diagnostics from a fleet")]
struct Cli {
    /// Agent port on every host
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum hosts collected at once
    #[arg(long)]
    max_hosts: Option<usize>,

    /// Seconds to wait for an agent to accept the connection
    #[arg(long)]
    connect_timeout_secs: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env("info");
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let (mut config, problems) = ControllerConfig::from_env();
    for problem in &problems {
        warn!("Ignoring bad configuration: {}", problem);
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(max) = cli.max_hosts {
        config.max_hosts = max.max(1);
    }
    if let Some(secs) = cli.connect_timeout_secs {
        config.connect_timeout = Duration::from_secs(secs.max(1));
    }

    info!(
        port = config.port,
        max_hosts = config.max_hosts,
        "Reading host manifest from stdin"
    );

    let ctx = ControllerContext::new(config, tokio::io::stdout());
    let summary = run_manifest(ctx.clone(), BufReader::new(tokio::io::stdin())).await;

    ctx.output
        .lock()
        .await
        .flush()
        .await
        .context("failed to flush output")?;

    if summary.failed > 0 || summary.refused > 0 {
        warn!(
            failed = summary.failed,
            refused = summary.refused,
            "Some hosts were not collected"
        );
    }
    Ok(())
}
