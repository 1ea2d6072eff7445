#![allow(dead_code)]

use docket_common::tar::{self, HEADER_SIZE};
use docketd::AgentContext;
use docketd::config::AgentConfig;
use docketd::devices::{DeviceEntry, DeviceSource};
use docketd::server::{ConnectionError, SessionSummary, handle_connection};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub use docket_common::testing::init_test_logging;

/// One decoded archive entry.
#[derive(Debug, Clone)]
pub struct TarEntry {
    pub name: String,
    pub body: Vec<u8>,
}

impl TarEntry {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Device source with nothing in it.
pub struct NoDevices;

impl DeviceSource for NoDevices {
    fn scan(&self) -> Vec<DeviceEntry> {
        Vec::new()
    }
}

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Agent configuration that never touches the host's device tree.
pub fn test_config() -> AgentConfig {
    AgentConfig {
        net_dev_path: fixture_path("proc_net_dev_sample.txt"),
        block_class_dir: PathBuf::from("/nonexistent/docket-test/block"),
        dev_root: PathBuf::from("/nonexistent/docket-test/dev"),
        inactivity_timeout: Duration::from_secs(10),
        dispatch_timeout: Duration::from_secs(10),
        exec_timeout: Duration::from_secs(10),
        ..AgentConfig::default()
    }
}

pub fn test_context(config: AgentConfig) -> Arc<AgentContext> {
    AgentContext::with_device_source(config, Arc::new(NoDevices))
}

/// Feed `script` to a session over an in-memory pipe and decode the output.
///
/// The client closes its write side after the script, so a script without
/// `EOF` ends in a disconnect.
pub async fn run_session(
    ctx: Arc<AgentContext>,
    script: &str,
) -> (Result<SessionSummary, ConnectionError>, Vec<TarEntry>) {
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(server);
    let handler = tokio::spawn(handle_connection(
        ctx,
        "test-peer".to_string(),
        reader,
        writer,
    ));

    client.write_all(script.as_bytes()).await.unwrap();
    client.shutdown().await.unwrap();

    let mut output = Vec::new();
    client.read_to_end(&mut output).await.unwrap();
    let result = handler.await.unwrap();
    (result, parse_tar(&output))
}

/// Decode a header-plus-padded-body stream.
pub fn parse_tar(mut data: &[u8]) -> Vec<TarEntry> {
    let mut entries = Vec::new();
    while data.len() >= HEADER_SIZE {
        let header: [u8; HEADER_SIZE] = data[..HEADER_SIZE].try_into().unwrap();
        if header.iter().all(|&b| b == 0) {
            break;
        }
        assert!(tar::verify_checksum(&header), "bad header checksum");
        let size = tar::entry_size(&header).unwrap() as usize;
        let body_start = HEADER_SIZE;
        let body_end = body_start + size;
        assert!(data.len() >= body_end, "truncated entry body");
        entries.push(TarEntry {
            name: tar::entry_name(&header),
            body: data[body_start..body_end].to_vec(),
        });
        let next = body_start + tar::padded_len(size as u64) as usize;
        data = &data[next.min(data.len())..];
    }
    assert!(data.is_empty(), "trailing bytes after last entry");
    entries
}

pub fn find<'a>(entries: &'a [TarEntry], name: &str) -> Option<&'a TarEntry> {
    entries.iter().find(|e| e.name == name)
}
