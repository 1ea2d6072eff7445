//! One host's collection session.

use crate::ControllerContext;
use crate::relay::{RelayError, RelayStats, relay_entries};
use docket_common::ManifestLine;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("failed to read instruction file {}: {source}", path.display())]
    Instructions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send directives: {0}")]
    Send(#[source] std::io::Error),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl HostError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Relay(e) if e.is_fatal())
    }
}

/// Connect to one agent, send its directives and relay what comes back.
pub async fn run_host(
    ctx: &ControllerContext,
    host: &ManifestLine,
) -> Result<RelayStats, HostError> {
    let config = &ctx.config;
    let addr = format!("{}:{}", host.ip, config.port);

    let stream = match tokio::time::timeout(
        config.connect_timeout,
        TcpStream::connect((host.ip.as_str(), config.port)),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(HostError::Connect { addr, source }),
        Err(_) => {
            return Err(HostError::ConnectTimeout {
                addr,
                timeout: config.connect_timeout,
            });
        }
    };

    let instructions = tokio::fs::read(&host.instructions)
        .await
        .map_err(|source| HostError::Instructions {
            path: host.instructions.clone(),
            source,
        })?;

    let (mut reader, mut writer) = stream.into_split();
    writer
        .write_all(format!("PREFIX|{}\n", host.name).as_bytes())
        .await
        .map_err(HostError::Send)?;
    writer.write_all(&instructions).await.map_err(HostError::Send)?;
    writer.shutdown().await.map_err(HostError::Send)?;

    let stats = relay_entries(
        &mut reader,
        &ctx.output,
        config.inactivity_timeout,
        config.relay_buffer,
    )
    .await?;
    Ok(stats)
}

/// Run one host and log the outcome.
///
/// Aborts the process if the shared output was corrupted.
pub async fn serve_host(
    ctx: &ControllerContext,
    host: &ManifestLine,
) -> Result<RelayStats, HostError> {
    info!(host = %host.name, ip = %host.ip, "Collecting from host");
    match run_host(ctx, host).await {
        Ok(stats) => {
            info!(
                host = %host.name,
                entries = stats.entries,
                bytes = stats.bytes,
                "Host finished"
            );
            Ok(stats)
        }
        Err(e) if e.is_fatal() => {
            error!(host = %host.name, ip = %host.ip, "Aborting, {}", e);
            std::process::abort();
        }
        Err(e) => {
            warn!(host = %host.name, ip = %host.ip, "Host failed: {}", e);
            Err(e)
        }
    }
}
