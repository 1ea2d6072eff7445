//! Docket controller.
//!
//! Reads a manifest of hosts, runs one collection session per host against
//! its `docketd`, and merges every agent's tar stream into one output.

pub mod config;
pub mod manifest;
pub mod relay;
pub mod session;

use config::ControllerConfig;
use docket_common::TaskPool;
use relay::{SharedOutput, shared_output};
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// State shared by every host session.
pub struct ControllerContext {
    pub config: ControllerConfig,
    pub host_pool: TaskPool,
    pub output: SharedOutput,
}

impl ControllerContext {
    pub fn new<W>(config: ControllerConfig, output: W) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Arc::new(Self {
            host_pool: TaskPool::new("host", config.max_hosts),
            output: shared_output(output),
            config,
        })
    }
}
