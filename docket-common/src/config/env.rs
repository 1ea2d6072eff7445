//! Typed reads of prefixed environment variables.
//!
//! A bad value never aborts startup: it is recorded as an [`EnvError`] and the
//! default is used, so a binary can report every rejected variable at once.

use super::source::Sourced;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: &'static str,
        value: String,
    },

    #[error("{var}: {value} is outside {min}..={max}")]
    OutOfRange {
        var: String,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Reads variables named `<prefix><NAME>`, collecting rejected values.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Parser for the controller's `DOCKET_` variables.
    pub fn new() -> Self {
        Self::with_prefix("DOCKET_")
    }

    pub fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            errors: Vec::new(),
        }
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Variable name and raw value, if the variable is set.
    fn lookup(&self, name: &str) -> Option<(String, String)> {
        let var = format!("{}{}", self.prefix, name);
        env::var(&var).ok().map(|value| (var, value))
    }

    /// Parse with `FromStr`, falling back to `default` on a bad value.
    fn parsed<T: FromStr>(&mut self, name: &str, default: T, expected: &'static str) -> Sourced<T> {
        let Some((var, value)) = self.lookup(name) else {
            return Sourced::default_value(default);
        };
        match value.trim().parse::<T>() {
            Ok(v) => Sourced::from_env(v, var),
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var,
                    expected,
                    value,
                });
                Sourced::default_value(default)
            }
        }
    }

    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        match self.lookup(name) {
            Some((var, value)) => Sourced::from_env(value, var),
            None => Sourced::default_value(default.to_string()),
        }
    }

    /// Unsigned integer in `min..=max`.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        let parsed = self.parsed(name, default, "unsigned integer");
        if (min..=max).contains(&parsed.value) {
            return parsed;
        }
        self.errors.push(EnvError::OutOfRange {
            var: parsed.env_var.unwrap_or_default(),
            value: parsed.value,
            min,
            max,
        });
        Sourced::default_value(default)
    }

    pub fn get_usize_range(
        &mut self,
        name: &str,
        default: usize,
        min: usize,
        max: usize,
    ) -> Sourced<usize> {
        self.get_u64_range(name, default as u64, min as u64, max as u64)
            .map(|v| usize::try_from(v).unwrap_or(default))
    }

    /// TCP port, never zero.
    pub fn get_u16(&mut self, name: &str, default: u16) -> Sourced<u16> {
        self.get_u64_range(name, u64::from(default), 1, u64::from(u16::MAX))
            .map(|v| u16::try_from(v).unwrap_or(default))
    }

    pub fn get_ip(&mut self, name: &str, default: IpAddr) -> Sourced<IpAddr> {
        self.parsed(name, default, "IP address")
    }

    /// Path with a leading `~/` expanded to the home directory.
    pub fn get_path(&mut self, name: &str, default: &str) -> Sourced<PathBuf> {
        match self.lookup(name) {
            Some((var, value)) => Sourced::from_env(expand_home(&value), var),
            None => Sourced::default_value(expand_home(default)),
        }
    }

    /// Like [`get_path`](Self::get_path), but unset or empty means `None`.
    pub fn get_optional_path(&mut self, name: &str) -> Sourced<Option<PathBuf>> {
        match self.lookup(name) {
            Some((var, value)) if value.is_empty() => Sourced::from_env(None, var),
            Some((var, value)) => Sourced::from_env(Some(expand_home(&value)), var),
            None => Sourced::default_value(None),
        }
    }

    /// One of the tracing levels, lowercased.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let Some((var, value)) = self.lookup(name) else {
            return Sourced::default_value(default.to_string());
        };
        let level = value.trim().to_ascii_lowercase();
        if matches!(
            level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error" | "off"
        ) {
            return Sourced::from_env(level, var);
        }
        self.errors.push(EnvError::InvalidValue {
            var,
            expected: "log level",
            value,
        });
        Sourced::default_value(default.to_string())
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

fn expand_home(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(value)
}
