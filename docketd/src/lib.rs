//! Docket agent.
//!
//! `docketd` listens for controller connections, reads collection
//! directives, and streams the collected files and command output back as a
//! tar stream that ends with the session's own log.

pub mod collect;
pub mod config;
pub mod devices;
pub mod expand;
pub mod server;
pub mod session;

use config::AgentConfig;
use devices::{DevfsSource, DeviceCache, DeviceSource};
use docket_common::TaskPool;
use expand::Expander;
use std::sync::Arc;

/// Process-wide agent state shared by every connection.
#[derive(Debug)]
pub struct AgentContext {
    pub config: AgentConfig,
    /// Bounds concurrent connections.
    pub connection_pool: TaskPool,
    /// Bounds collection tasks across all sessions.
    pub task_pool: TaskPool,
    pub devices: Arc<DeviceCache>,
    pub expander: Expander,
}

impl AgentContext {
    pub fn new(config: AgentConfig) -> Arc<Self> {
        let source = Arc::new(DevfsSource::new(config.dev_root.clone()));
        Self::with_device_source(config, source)
    }

    /// Build with a custom device source.
    pub fn with_device_source(config: AgentConfig, source: Arc<dyn DeviceSource>) -> Arc<Self> {
        let devices = DeviceCache::new(source, config.device_ttl);
        let expander = Expander::new(
            Arc::clone(&devices),
            config.net_dev_path.clone(),
            config.block_class_dir.clone(),
        );
        Arc::new(Self {
            connection_pool: TaskPool::new("connection", config.max_connections),
            task_pool: TaskPool::new("collector", config.max_tasks),
            devices,
            expander,
            config,
        })
    }
}
