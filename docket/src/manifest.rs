//! Manifest reading and host fan-out.

use crate::ControllerContext;
use crate::session::serve_host;
use docket_common::{ManifestLine, is_ignored_line};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

/// How the hosts of one manifest fared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManifestSummary {
    pub completed: usize,
    pub failed: usize,
    /// Lines that never got a host slot.
    pub refused: usize,
    /// Malformed lines.
    pub skipped: usize,
    pub entries: usize,
}

/// Start a host session per manifest line and wait for all of them.
pub async fn run_manifest<R>(ctx: Arc<ControllerContext>, input: R) -> ManifestSummary
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = ManifestSummary::default();
    let mut sessions = Vec::new();
    let mut lines = input.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read manifest, no further hosts: {}", e);
                break;
            }
        };
        if is_ignored_line(&line) {
            continue;
        }

        let host = match ManifestLine::parse(&line) {
            Ok(host) => host,
            Err(e) => {
                warn!(line = %line, "Skipping manifest line: {}", e);
                summary.skipped += 1;
                continue;
            }
        };

        let host_name = host.name.clone();
        let host_ctx = Arc::clone(&ctx);
        let dispatched = ctx
            .host_pool
            .spawn_within(ctx.config.dispatch_timeout, async move {
                serve_host(&host_ctx, &host).await
            })
            .await;

        match dispatched {
            Ok(handle) => sessions.push(handle),
            Err(e) => {
                warn!(host = %host_name, "Host not collected: {}", e);
                summary.refused += 1;
            }
        }
    }

    for session in sessions {
        match session.await {
            Ok(Ok(stats)) => {
                summary.completed += 1;
                summary.entries += stats.entries;
            }
            Ok(Err(_)) => summary.failed += 1,
            Err(e) => {
                warn!("Host session task failed: {}", e);
                summary.failed += 1;
            }
        }
    }

    info!(
        completed = summary.completed,
        failed = summary.failed,
        refused = summary.refused,
        skipped = summary.skipped,
        entries = summary.entries,
        "Collection finished"
    );
    summary
}
