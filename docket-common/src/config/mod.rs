//! Environment configuration for Docket binaries.
//!
//! Tunables (pool sizes, timeouts, buffer limits) are read from prefixed
//! environment variables with type checking and range validation. Errors are
//! collected instead of aborting so a binary can report every bad variable at
//! startup and fall back to defaults.

pub mod env;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}
