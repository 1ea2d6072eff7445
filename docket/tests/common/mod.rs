#![allow(dead_code)]

use docket::ControllerContext;
use docket::config::ControllerConfig;
use docket_common::tar::{self, HEADER_SIZE};
use docketd::devices::{DeviceEntry, DeviceSource};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub use docket_common::testing::init_test_logging;

/// Device source for in-process agents; the controller tests never expand
/// `%BLOCK`.
pub struct NoDevices;

impl DeviceSource for NoDevices {
    fn scan(&self) -> Vec<DeviceEntry> {
        Vec::new()
    }
}

/// In-memory output that can be inspected after the run.
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl AsyncWrite for Capture {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

pub fn test_config(port: u16) -> ControllerConfig {
    ControllerConfig {
        port,
        connect_timeout: Duration::from_secs(2),
        inactivity_timeout: Duration::from_secs(10),
        dispatch_timeout: Duration::from_secs(10),
        ..ControllerConfig::default()
    }
}

pub fn controller(port: u16) -> (Arc<ControllerContext>, Capture) {
    let capture = Capture::default();
    (ControllerContext::new(test_config(port), capture.clone()), capture)
}

/// A port nothing is listening on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Build one entry as an agent would send it.
pub fn entry(prefix: &str, name: &str, body: &[u8]) -> Vec<u8> {
    let mut out = tar::encode_header(prefix, ".", name, body.len() as u64, 0)
        .unwrap()
        .to_vec();
    out.extend_from_slice(body);
    out.extend(tar::encode_padding(body.len() as u64));
    out
}

/// A scripted agent: for each of `sessions` connections it reads the
/// directives until the controller half-closes, then sends `respond(request)`
/// and closes. Returns the requests it saw.
pub async fn fake_agent<F>(sessions: usize, respond: F) -> (u16, JoinHandle<Vec<String>>)
where
    F: Fn(&str) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let respond = Arc::new(respond);

    let handle = tokio::spawn(async move {
        let mut served = Vec::new();
        for _ in 0..sessions {
            let (mut stream, _) = listener.accept().await.unwrap();
            let respond = Arc::clone(&respond);
            served.push(tokio::spawn(async move {
                let mut request = Vec::new();
                stream.read_to_end(&mut request).await.unwrap();
                let request = String::from_utf8_lossy(&request).into_owned();
                let reply = respond(&request);
                let _ = stream.write_all(&reply).await;
                let _ = stream.shutdown().await;
                request
            }));
        }
        let mut requests = Vec::new();
        for task in served {
            requests.push(task.await.unwrap());
        }
        requests
    });

    (port, handle)
}

/// Names and bodies of a header-plus-padded-body stream.
pub fn parse_tar(mut data: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut entries = Vec::new();
    while data.len() >= HEADER_SIZE {
        let header: [u8; HEADER_SIZE] = data[..HEADER_SIZE].try_into().unwrap();
        assert!(tar::verify_checksum(&header), "bad header checksum");
        let size = tar::entry_size(&header).unwrap() as usize;
        entries.push((
            tar::entry_name(&header),
            data[HEADER_SIZE..HEADER_SIZE + size].to_vec(),
        ));
        data = &data[HEADER_SIZE + tar::padded_len(size as u64) as usize..];
    }
    assert!(data.is_empty(), "trailing bytes after last entry");
    entries
}
