//! Single-file collector.
//!
//! The entry size is fixed before the body is sent: the stat size, or the
//! length of the first read when that read comes up short. A file that
//! shrinks afterwards is padded with zeros to the declared size and one that
//! grows is cut off, so the archive stays well-formed.

use super::{CollectError, Job};
use crate::session::{EntryError, EntryWriter, unix_now};
use docket_common::tar;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Copy `path` into the archive as `./<prefix>/<dir>/<path>`.
pub async fn collect_file(job: &Job, dir: &str, path: &str) {
    job.log(format!("Collecting file {path}"));
    if let Err(e) = copy_file(job, dir, path).await {
        job.log(e.to_string());
    }
}

async fn copy_file(job: &Job, dir: &str, path: &str) -> Result<(), CollectError> {
    // Checked before opening so a FIFO or device never blocks the open.
    let pre = tokio::fs::metadata(path)
        .await
        .map_err(|source| CollectError::Open {
            path: path.to_string(),
            source,
        })?;
    if !pre.is_file() {
        return Err(CollectError::NotRegular(path.to_string()));
    }

    let mut file = File::open(path).await.map_err(|source| CollectError::Open {
        path: path.to_string(),
        source,
    })?;
    let meta = file.metadata().await.map_err(|source| CollectError::Stat {
        path: path.to_string(),
        source,
    })?;
    if !meta.is_file() {
        return Err(CollectError::NotRegular(path.to_string()));
    }

    let mut buf = vec![0u8; job.agent.config.file_buffer.max(1)];
    let first = file.read(&mut buf).await.map_err(|source| CollectError::Read {
        path: path.to_string(),
        source,
    })?;

    let stat_size = meta.len();
    if stat_size == 0 {
        // Pseudo-files report zero and are read once.
        job.session
            .send_entry(&job.prefix, dir, path, &buf[..first])
            .await?;
        return Ok(());
    }

    let declared = declared_size(stat_size, first, buf.len());
    let header = tar::encode_header(&job.prefix, dir, path, declared, unix_now())
        .map_err(EntryError::from)?;
    let Some(mut entry) = job.session.begin_entry().await else {
        return Ok(());
    };
    entry.start(&header, path).await?;

    match copy_body(&mut file, &mut entry, &mut buf, first, declared).await? {
        BodyEnd::Exact => {}
        BodyEnd::Grew => job.log(format!(
            "File {path} grew while collecting, cut at {declared} bytes"
        )),
        BodyEnd::Shrank { padded, cause } => {
            if let Some(e) = cause {
                job.log(format!("Failed to read file {path}: {e}"));
            }
            job.log(format!(
                "File {path} shrank while collecting, padded {padded} bytes"
            ));
        }
    }

    entry.finish(declared).await?;
    Ok(())
}

/// Size to put in the header, given the stat size and the first read.
///
/// A first read that comes up short of both the buffer and the stat size
/// means the file is smaller than stat claims, so its length wins.
fn declared_size(stat_size: u64, first: usize, buf_len: usize) -> u64 {
    if first < buf_len && (first as u64) < stat_size {
        first as u64
    } else {
        stat_size
    }
}

/// How the body compared to the declared size.
#[derive(Debug)]
enum BodyEnd {
    Exact,
    /// More data than declared; the excess was not sent.
    Grew,
    /// Reading stopped early; `padded` zero bytes made up the difference.
    Shrank {
        padded: u64,
        cause: Option<std::io::Error>,
    },
}

/// Send exactly `declared` body bytes. `buf[..first]` holds data already read.
async fn copy_body<R>(
    reader: &mut R,
    entry: &mut EntryWriter<'_>,
    buf: &mut [u8],
    first: usize,
    declared: u64,
) -> Result<BodyEnd, EntryError>
where
    R: AsyncRead + Unpin,
{
    let mut sent = (first as u64).min(declared);
    entry.write(&buf[..sent as usize]).await?;
    let mut grew = first as u64 > declared;

    while sent < declared {
        let (n, cause) = match reader.read(buf).await {
            Ok(n) => (n, None),
            Err(e) => (0, Some(e)),
        };
        if n == 0 {
            let padded = declared - sent;
            entry.write_zeros(padded).await?;
            return Ok(BodyEnd::Shrank { padded, cause });
        }
        let take = (n as u64).min(declared - sent);
        grew |= take < n as u64;
        entry.write(&buf[..take as usize]).await?;
        sent += take;
    }

    Ok(if grew { BodyEnd::Grew } else { BodyEnd::Exact })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use docket_common::tar::{HEADER_SIZE, entry_size};

    #[test]
    fn test_declared_size_rules() {
        // Full buffer: trust stat.
        assert_eq!(declared_size(100_000, 4096, 4096), 100_000);
        // Short read below stat: the read length wins.
        assert_eq!(declared_size(4096, 1000, 8192), 1000);
        // Short read that covers stat: stat.
        assert_eq!(declared_size(1000, 1000, 8192), 1000);
        // Read longer than stat (file grew before the first read).
        assert_eq!(declared_size(10, 20, 8192), 10);
    }

    /// Run `copy_body` against `source` and return the outcome and the
    /// bytes that reached the wire after the header.
    async fn copy_from(source: &[u8], first_len: usize, declared: u64) -> (BodyEnd, Vec<u8>) {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let session = Session::new("test", Box::new(server), 1024);

        let mut buf = vec![0u8; 8];
        buf[..first_len].copy_from_slice(&source[..first_len]);
        let mut rest = &source[first_len..];

        let header = tar::encode_header("h", ".", "f", declared, 0).unwrap();
        let mut entry = session.begin_entry().await.unwrap();
        entry.start(&header, "f").await.unwrap();
        let end = copy_body(&mut rest, &mut entry, &mut buf, first_len, declared)
            .await
            .unwrap();
        entry.finish(declared).await.unwrap();
        session.close().await;

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let header: [u8; HEADER_SIZE] = out[..HEADER_SIZE].try_into().unwrap();
        assert_eq!(entry_size(&header).unwrap(), declared);
        assert_eq!((out.len() - HEADER_SIZE) % 512, 0);
        (end, out[HEADER_SIZE..HEADER_SIZE + declared as usize].to_vec())
    }

    #[tokio::test]
    async fn test_copy_exact_size() {
        let data = b"0123456789abcdefghij";
        let (end, body) = copy_from(data, 8, 20).await;
        assert!(matches!(end, BodyEnd::Exact));
        assert_eq!(body, data);
    }

    #[tokio::test]
    async fn test_copy_pads_shrunk_file() {
        let data = b"0123456789ab";
        let (end, body) = copy_from(data, 8, 20).await;
        assert!(matches!(end, BodyEnd::Shrank { padded: 8, cause: None }));
        assert_eq!(&body[..12], data);
        assert!(body[12..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_copy_cuts_grown_file() {
        let data = b"0123456789abcdefghijKLMNOPQRSTUV";
        let (end, body) = copy_from(data, 8, 20).await;
        assert!(matches!(end, BodyEnd::Grew));
        assert_eq!(body, &data[..20]);
    }
}
