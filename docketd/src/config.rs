//! Agent configuration.
//!
//! Values come from built-in defaults, then `DOCKETD_*` environment
//! variables, then command-line flags (applied by `main`).

use docket_common::{DEFAULT_AGENT_PORT, EnvError, EnvParser};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Concurrent connections accepted before new ones are refused.
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;
/// Collection tasks in flight across all sessions.
pub const DEFAULT_MAX_TASKS: usize = 64;
/// Silence allowed between directive chunks before the session is dropped.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);
/// How long a directive waits for a free task slot before it is refused.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(120);
/// Directive read buffer; a single line must fit.
pub const DEFAULT_READ_BUFFER: usize = 32 * 1024;
/// Chunk size used to stream file bodies.
pub const DEFAULT_FILE_BUFFER: usize = 48 * 1024;
/// Per-session log capacity.
pub const DEFAULT_LOG_CAPACITY: usize = 512 * 1024;
pub const DEFAULT_DEVICE_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(60);
/// Bytes captured per command output stream.
pub const DEFAULT_EXEC_OUTPUT_LIMIT: usize = 16 * 1024 * 1024;

/// Runtime settings for `docketd`.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub listen: IpAddr,
    pub port: u16,
    pub max_connections: usize,
    pub max_tasks: usize,
    pub inactivity_timeout: Duration,
    pub dispatch_timeout: Duration,
    pub read_buffer: usize,
    pub file_buffer: usize,
    pub log_capacity: usize,
    pub device_ttl: Duration,
    pub exec_timeout: Duration,
    pub exec_output_limit: usize,
    /// Root of the device directory walked by the device cache.
    pub dev_root: PathBuf,
    /// Interface table read for `%NET`.
    pub net_dev_path: PathBuf,
    /// Block device class directory read for `%BLOCK`.
    pub block_class_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_AGENT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_tasks: DEFAULT_MAX_TASKS,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            read_buffer: DEFAULT_READ_BUFFER,
            file_buffer: DEFAULT_FILE_BUFFER,
            log_capacity: DEFAULT_LOG_CAPACITY,
            device_ttl: DEFAULT_DEVICE_TTL,
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            exec_output_limit: DEFAULT_EXEC_OUTPUT_LIMIT,
            dev_root: PathBuf::from("/dev"),
            net_dev_path: PathBuf::from("/proc/net/dev"),
            block_class_dir: PathBuf::from("/sys/class/block"),
        }
    }
}

impl AgentConfig {
    /// Load from `DOCKETD_*` variables.
    ///
    /// Bad values fall back to their defaults; the problems are returned so
    /// the caller can log them once logging is up.
    pub fn from_env() -> (Self, Vec<EnvError>) {
        let defaults = Self::default();
        let mut parser = EnvParser::with_prefix("DOCKETD_");

        let config = Self {
            listen: parser.get_ip("LISTEN", defaults.listen).value,
            port: parser.get_u16("PORT", defaults.port).value,
            max_connections: parser
                .get_usize_range("MAX_CONNECTIONS", defaults.max_connections, 1, 4096)
                .value,
            max_tasks: parser
                .get_usize_range("MAX_TASKS", defaults.max_tasks, 1, 4096)
                .value,
            inactivity_timeout: secs(parser.get_u64_range(
                "INACTIVITY_TIMEOUT_SECS",
                defaults.inactivity_timeout.as_secs(),
                1,
                86_400,
            )
            .value),
            dispatch_timeout: secs(parser.get_u64_range(
                "DISPATCH_TIMEOUT_SECS",
                defaults.dispatch_timeout.as_secs(),
                1,
                86_400,
            )
            .value),
            read_buffer: defaults.read_buffer,
            file_buffer: defaults.file_buffer,
            log_capacity: parser
                .get_usize_range("LOG_CAPACITY", defaults.log_capacity, 4096, 64 * 1024 * 1024)
                .value,
            device_ttl: secs(parser.get_u64_range(
                "DEVICE_TTL_SECS",
                defaults.device_ttl.as_secs(),
                0,
                3600,
            )
            .value),
            exec_timeout: secs(parser.get_u64_range(
                "EXEC_TIMEOUT_SECS",
                defaults.exec_timeout.as_secs(),
                1,
                86_400,
            )
            .value),
            exec_output_limit: parser
                .get_usize_range(
                    "EXEC_OUTPUT_LIMIT",
                    defaults.exec_output_limit,
                    1024,
                    1024 * 1024 * 1024,
                )
                .value,
            dev_root: parser.get_path("DEV_ROOT", "/dev").value,
            net_dev_path: parser.get_path("NET_DEV_PATH", "/proc/net/dev").value,
            block_class_dir: parser.get_path("BLOCK_CLASS_DIR", "/sys/class/block").value,
        };

        (config, parser.take_errors())
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}
