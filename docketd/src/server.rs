//! Connection handling and the accept loop.
//!
//! A connection goes through two phases. While reading, directive lines are
//! parsed and dispatched as they arrive. Once `EOF` is seen the read side is
//! dropped, the handler waits for every dispatched task, and the session log
//! is sent as the last entry. A connection that ends any other way is torn
//! down at once.

use crate::AgentContext;
use crate::collect::{self, Job};
use crate::session::{Session, SessionWriter};
use anyhow::Result;
use docket_common::{Directive, EOF_MARKER, is_ignored_line};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Why a connection ended before `EOF`.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("peer disconnected before EOF")]
    Disconnected,

    #[error("no data from peer for {0:?}")]
    Timeout(Duration),

    #[error("read from peer failed: {0}")]
    Read(#[from] io::Error),

    #[error("directive line longer than {limit} bytes")]
    LineTooLong { limit: usize },
}

/// What a completed session produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSummary {
    pub dispatched: usize,
    pub refused: usize,
    pub rejected: usize,
    pub entries: usize,
}

/// Reads directives and keeps the prefix in force.
struct Dispatcher {
    ctx: Arc<AgentContext>,
    session: Arc<Session>,
    prefix: Arc<str>,
    summary: SessionSummary,
}

impl Dispatcher {
    async fn dispatch_line(&mut self, line: &str) {
        if is_ignored_line(line) {
            return;
        }

        let directive = match Directive::parse(line) {
            Ok(directive) => directive,
            Err(e) => {
                self.summary.rejected += 1;
                self.session.log(e.to_string());
                return;
            }
        };

        if let Directive::SetPrefix(prefix) = directive {
            debug!(peer = %self.session.peer(), prefix = %prefix, "Prefix set");
            self.prefix = Arc::from(prefix);
            return;
        }

        let verb = directive.verb();
        let job = Job::new(
            Arc::clone(&self.ctx),
            self.session.track(),
            Arc::clone(&self.prefix),
        );
        let dispatched = self
            .ctx
            .task_pool
            .spawn_within(self.ctx.config.dispatch_timeout, collect::run(job, directive))
            .await;

        match dispatched {
            Ok(_) => self.summary.dispatched += 1,
            Err(e) => {
                self.summary.refused += 1;
                self.session.log(format!("Dropped {verb} directive: {e}"));
            }
        }
    }
}

/// Serve one connection to completion.
pub async fn handle_connection<R, W>(
    ctx: Arc<AgentContext>,
    peer: String,
    mut reader: R,
    writer: W,
) -> Result<SessionSummary, ConnectionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let session = Session::new(peer, Box::new(writer) as SessionWriter, ctx.config.log_capacity);
    let mut dispatcher = Dispatcher {
        ctx: Arc::clone(&ctx),
        session: Arc::clone(&session),
        prefix: Arc::from(""),
        summary: SessionSummary::default(),
    };

    let intake = read_directives(&ctx, &mut reader, &mut dispatcher).await;
    drop(reader);

    if let Err(e) = intake {
        session.close().await;
        return Err(e);
    }

    session.wait_idle().await;
    session.log("Docket collection done");
    if session.log_dropped() > 0 {
        warn!(
            peer = %session.peer(),
            dropped = session.log_dropped(),
            "Session log overflowed"
        );
    }

    let log = session.log_snapshot();
    if let Err(e) = session
        .send_entry(&dispatcher.prefix, ".", "docket.log", &log)
        .await
    {
        warn!(peer = %session.peer(), "Failed to send session log: {}", e);
    }
    session.close().await;

    let mut summary = dispatcher.summary;
    summary.entries = session.entries_written();
    Ok(summary)
}

/// Read directive lines until `EOF`.
async fn read_directives<R>(
    ctx: &AgentContext,
    reader: &mut R,
    dispatcher: &mut Dispatcher,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let inactivity = ctx.config.inactivity_timeout;
    let mut buf = vec![0u8; ctx.config.read_buffer.max(1)];
    let mut filled = 0;

    loop {
        if filled == buf.len() {
            return Err(ConnectionError::LineTooLong { limit: buf.len() });
        }

        let n = match tokio::time::timeout(inactivity, reader.read(&mut buf[filled..])).await {
            Err(_) => return Err(ConnectionError::Timeout(inactivity)),
            Ok(result) => result?,
        };
        if n == 0 {
            return Err(ConnectionError::Disconnected);
        }
        filled += n;

        let mut consumed = 0;
        while let Some(pos) = memchr::memchr(b'\n', &buf[consumed..filled]) {
            let raw = &buf[consumed..consumed + pos];
            consumed += pos + 1;

            let line = String::from_utf8_lossy(raw).into_owned();
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if line == EOF_MARKER {
                return Ok(());
            }
            dispatcher.dispatch_line(line).await;
        }

        buf.copy_within(consumed..filled, 0);
        filled -= consumed;
    }
}

/// Accept connections until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, ctx: Arc<AgentContext>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let accepted = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, no longer accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => accepted,
        };

        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) if is_transient(&e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
            Err(e) => {
                error!("Accept failed, stopping: {}", e);
                return Err(anyhow::Error::new(e).context("accept failed"));
            }
        };

        let peer = addr.to_string();
        let conn_ctx = Arc::clone(&ctx);
        let spawned = ctx.connection_pool.try_spawn(async move {
            info!(peer = %peer, "Collection session started");
            let (reader, writer) = stream.into_split();
            match handle_connection(conn_ctx, peer.clone(), reader, writer).await {
                Ok(summary) => info!(
                    peer = %peer,
                    dispatched = summary.dispatched,
                    refused = summary.refused,
                    rejected = summary.rejected,
                    entries = summary.entries,
                    "Collection session finished"
                ),
                Err(e) => warn!(peer = %peer, "Collection session aborted: {}", e),
            }
        });

        if let Err(e) = spawned {
            warn!(peer = %addr, "Refusing connection: {}", e);
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
