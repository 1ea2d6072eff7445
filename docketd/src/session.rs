//! Per-connection collection session.
//!
//! A session owns the write half of the connection, a bounded in-memory log
//! and a count of collection tasks still running on its behalf. Entries are
//! written under the writer lock from header to padding, so concurrent
//! collectors never interleave inside an entry.

use docket_common::tar::{self, TarError};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{MutexGuard, Notify};
use tracing::{debug, warn};

/// Boxed write half of a connection.
pub type SessionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Errors from writing an entry.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error(transparent)]
    Header(#[from] TarError),

    #[error("failed to write entry {name}: {source}")]
    Write {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Bounded session log.
///
/// Lines that would overflow the capacity are dropped whole.
#[derive(Debug)]
pub struct SessionLog {
    capacity: usize,
    buffer: Mutex<String>,
    dropped: AtomicUsize,
}

impl SessionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: Mutex::new(String::new()),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn append(&self, line: &str) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|p| p.into_inner());
        if buffer.len() + line.len() + 1 > self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        buffer.push_str(line);
        buffer.push('\n');
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lines dropped for lack of room.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_bytes()
            .to_vec()
    }
}

/// One collection session.
pub struct Session {
    peer: String,
    log: SessionLog,
    pending: AtomicUsize,
    idle: Notify,
    /// `None` once the session has been closed.
    writer: tokio::sync::Mutex<Option<SessionWriter>>,
    entries: AtomicUsize,
}

impl Session {
    pub fn new(peer: impl Into<String>, writer: SessionWriter, log_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            peer: peer.into(),
            log: SessionLog::new(log_capacity),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            writer: tokio::sync::Mutex::new(Some(writer)),
            entries: AtomicUsize::new(0),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Append a line to the session log.
    pub fn log(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        debug!(peer = %self.peer, "{}", line);
        self.log.append(line);
    }

    pub fn log_snapshot(&self) -> Vec<u8> {
        self.log.snapshot()
    }

    pub fn log_dropped(&self) -> usize {
        self.log.dropped()
    }

    /// Entries fully written so far.
    pub fn entries_written(&self) -> usize {
        self.entries.load(Ordering::Acquire)
    }

    /// Collection tasks still outstanding.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Register an outstanding task; it counts until the token is dropped.
    pub fn track(self: &Arc<Self>) -> PendingTask {
        self.pending.fetch_add(1, Ordering::AcqRel);
        PendingTask {
            session: Arc::clone(self),
        }
    }

    /// Wait until no tracked task remains.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Lock the writer for one entry. `None` once the session is closed.
    pub async fn begin_entry(&self) -> Option<EntryWriter<'_>> {
        let guard = self.writer.lock().await;
        if guard.is_none() {
            return None;
        }
        Some(EntryWriter {
            session: self,
            guard,
            name: String::new(),
        })
    }

    /// Write a complete entry whose body is already in memory.
    pub async fn send_entry(
        &self,
        prefix: &str,
        dir: &str,
        name: &str,
        body: &[u8],
    ) -> Result<(), EntryError> {
        let header = tar::encode_header(prefix, dir, name, body.len() as u64, unix_now())?;
        let Some(mut entry) = self.begin_entry().await else {
            return Ok(());
        };
        entry.start(&header, name).await?;
        entry.write(body).await?;
        entry.finish(body.len() as u64).await
    }

    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }

    /// Shut down the write half. Later entries are skipped.
    pub async fn close(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.shutdown().await
        {
            debug!(peer = %self.peer, "Error shutting down connection: {}", e);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("pending", &self.pending())
            .field("entries", &self.entries_written())
            .finish()
    }
}

/// Marks one outstanding task of a session.
///
/// Cloning registers another task.
pub struct PendingTask {
    session: Arc<Session>,
}

impl PendingTask {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl std::ops::Deref for PendingTask {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Clone for PendingTask {
    fn clone(&self) -> Self {
        self.session.track()
    }
}

impl Drop for PendingTask {
    fn drop(&mut self) {
        if self.session.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.session.idle.notify_waiters();
        }
    }
}

/// Exclusive access to the connection for one entry.
pub struct EntryWriter<'a> {
    session: &'a Session,
    guard: MutexGuard<'a, Option<SessionWriter>>,
    name: String,
}

impl EntryWriter<'_> {
    /// Write the header block.
    pub async fn start(
        &mut self,
        header: &[u8; tar::HEADER_SIZE],
        name: &str,
    ) -> Result<(), EntryError> {
        self.name = name.to_string();
        self.write(header).await
    }

    /// Write body bytes.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), EntryError> {
        let result = match self.guard.as_mut() {
            Some(writer) => writer.write_all(bytes).await,
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "session closed",
            )),
        };
        result.map_err(|source| self.fail(source))
    }

    /// Write `count` zero bytes, used when a file shrinks mid-copy.
    pub async fn write_zeros(&mut self, mut count: u64) -> Result<(), EntryError> {
        let zeros = [0u8; tar::BLOCK_SIZE];
        while count > 0 {
            let n = count.min(zeros.len() as u64) as usize;
            self.write(&zeros[..n]).await?;
            count -= n as u64;
        }
        Ok(())
    }

    /// Pad a body of `size` bytes to the block boundary and flush.
    pub async fn finish(mut self, size: u64) -> Result<(), EntryError> {
        let padding = tar::encode_padding(size);
        if !padding.is_empty() {
            self.write(&padding).await?;
        }
        let flushed = match self.guard.as_mut() {
            Some(writer) => writer.flush().await,
            None => Ok(()),
        };
        flushed.map_err(|source| self.fail(source))?;
        self.session.entries.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// A failed write ends the session's output.
    fn fail(&mut self, source: std::io::Error) -> EntryError {
        if self.guard.take().is_some() {
            warn!(
                peer = %self.session.peer,
                "Write to peer failed, closing session output: {}",
                source
            );
        }
        EntryError::Write {
            name: self.name.clone(),
            source,
        }
    }
}

/// Seconds since the epoch, for header mtimes.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
