//! Relaying an agent's tar stream into the shared output.
//!
//! Each entry is read as a 512-byte header followed by its padded body and
//! copied to the output while holding the output lock, so entries from
//! different hosts never interleave. Once a header has been written the
//! entry must be completed; if that cannot happen the shared output is
//! corrupt and the caller must not continue.

use docket_common::tar::{self, HEADER_SIZE, TarError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Output shared by every host session.
pub type SharedOutput = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

pub fn shared_output<W>(writer: W) -> SharedOutput
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    Arc::new(Mutex::new(Box::new(writer)))
}

#[derive(Debug, Error)]
pub enum RelayError {
    /// The agent closed the connection part way through a header.
    #[error("agent closed the stream after {got} of {HEADER_SIZE} header bytes")]
    TruncatedHeader { got: usize },

    #[error("bad entry header: {0}")]
    Header(#[from] TarError),

    #[error("no data from agent for {0:?}")]
    Timeout(Duration),

    #[error("read from agent failed: {0}")]
    Read(#[source] std::io::Error),

    /// The shared output holds a partial entry.
    #[error("output corrupted while relaying {entry}: {reason}")]
    Corrupted { entry: String, reason: String },
}

impl RelayError {
    /// Whether the shared output can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }
}

/// Totals for one relayed stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub entries: usize,
    /// Bytes written to the output, headers included.
    pub bytes: u64,
}

enum HeaderRead {
    Complete,
    Closed,
}

/// Copy entries from `reader` to `output` until the agent closes its side.
pub async fn relay_entries<R>(
    reader: &mut R,
    output: &SharedOutput,
    inactivity: Duration,
    chunk_size: usize,
) -> Result<RelayStats, RelayError>
where
    R: AsyncRead + Unpin,
{
    let mut stats = RelayStats::default();
    let mut header = [0u8; HEADER_SIZE];
    let mut buf = vec![0u8; chunk_size.max(1)];

    loop {
        if let HeaderRead::Closed = read_header(reader, &mut header, inactivity).await? {
            return Ok(stats);
        }
        let size = tar::entry_size(&header)?;
        let padded = tar::padded_len(size);
        let name = tar::entry_name(&header);
        let corrupted = |reason: String| RelayError::Corrupted {
            entry: name.clone(),
            reason,
        };

        let mut out = output.lock().await;
        out.write_all(&header)
            .await
            .map_err(|e| corrupted(format!("header write failed: {e}")))?;

        let mut remaining = padded;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match tokio::time::timeout(inactivity, reader.read(&mut buf[..want])).await {
                Err(_) => {
                    return Err(corrupted(format!(
                        "agent went silent with {remaining} bytes outstanding"
                    )));
                }
                Ok(Err(e)) => return Err(corrupted(format!("read failed: {e}"))),
                Ok(Ok(0)) => {
                    return Err(corrupted(format!(
                        "agent closed with {remaining} of {padded} body bytes outstanding"
                    )));
                }
                Ok(Ok(n)) => n,
            };
            out.write_all(&buf[..n])
                .await
                .map_err(|e| corrupted(format!("body write failed: {e}")))?;
            remaining -= n as u64;
        }
        out.flush()
            .await
            .map_err(|e| corrupted(format!("flush failed: {e}")))?;
        drop(out);

        stats.entries += 1;
        stats.bytes += HEADER_SIZE as u64 + padded;
        tokio::task::yield_now().await;
    }
}

async fn read_header<R>(
    reader: &mut R,
    header: &mut [u8; HEADER_SIZE],
    inactivity: Duration,
) -> Result<HeaderRead, RelayError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = tokio::time::timeout(inactivity, reader.read(&mut header[filled..]))
            .await
            .map_err(|_| RelayError::Timeout(inactivity))?
            .map_err(RelayError::Read)?;
        if n == 0 {
            return if filled == 0 {
                Ok(HeaderRead::Closed)
            } else {
                Err(RelayError::TruncatedHeader { got: filled })
            };
        }
        filled += n;
    }
    Ok(HeaderRead::Complete)
}
