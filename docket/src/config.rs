//! Controller configuration.

use docket_common::{DEFAULT_AGENT_PORT, EnvError, EnvParser};
use std::time::Duration;

/// Host sessions in flight at once.
pub const DEFAULT_MAX_HOSTS: usize = 64;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Silence allowed from an agent before its session is abandoned.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);
/// How long a manifest line waits for a free host slot.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(120);
/// Chunk size used when relaying entry bodies.
pub const DEFAULT_RELAY_BUFFER: usize = 48 * 1024;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Agent port on every host.
    pub port: u16,
    pub max_hosts: usize,
    pub connect_timeout: Duration,
    pub inactivity_timeout: Duration,
    pub dispatch_timeout: Duration,
    pub relay_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_AGENT_PORT,
            max_hosts: DEFAULT_MAX_HOSTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            relay_buffer: DEFAULT_RELAY_BUFFER,
        }
    }
}

impl ControllerConfig {
    /// Load from `DOCKET_*` variables, returning any values that were
    /// rejected.
    pub fn from_env() -> (Self, Vec<EnvError>) {
        let defaults = Self::default();
        let mut parser = EnvParser::new();

        let config = Self {
            port: parser.get_u16("PORT", defaults.port).value,
            max_hosts: parser
                .get_usize_range("MAX_HOSTS", defaults.max_hosts, 1, 4096)
                .value,
            connect_timeout: Duration::from_secs(
                parser
                    .get_u64_range(
                        "CONNECT_TIMEOUT_SECS",
                        defaults.connect_timeout.as_secs(),
                        1,
                        3600,
                    )
                    .value,
            ),
            inactivity_timeout: Duration::from_secs(
                parser
                    .get_u64_range(
                        "INACTIVITY_TIMEOUT_SECS",
                        defaults.inactivity_timeout.as_secs(),
                        1,
                        86_400,
                    )
                    .value,
            ),
            dispatch_timeout: Duration::from_secs(
                parser
                    .get_u64_range(
                        "DISPATCH_TIMEOUT_SECS",
                        defaults.dispatch_timeout.as_secs(),
                        1,
                        86_400,
                    )
                    .value,
            ),
            relay_buffer: defaults.relay_buffer,
        };

        (config, parser.take_errors())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner())
    }

    #[allow(unsafe_code)]
    fn set_env(key: &str, value: &str) {
        // SAFETY: Tests touching the environment hold env_lock
        unsafe { std::env::set_var(key, value) };
    }

    #[allow(unsafe_code)]
    fn remove_env(key: &str) {
        // SAFETY: Tests touching the environment hold env_lock
        unsafe { std::env::remove_var(key) };
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.port, 7000);
        assert_eq!(config.max_hosts, 64);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_from_env_overrides_and_rejects() {
        let _guard = env_lock();
        set_env("DOCKET_MAX_HOSTS", "8");
        set_env("DOCKET_CONNECT_TIMEOUT_SECS", "0");

        let (config, errors) = ControllerConfig::from_env();
        assert_eq!(config.max_hosts, 8);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(errors.len(), 1);

        remove_env("DOCKET_MAX_HOSTS");
        remove_env("DOCKET_CONNECT_TIMEOUT_SECS");
    }
}
