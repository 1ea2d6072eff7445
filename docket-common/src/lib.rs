//! Shared types and utilities for Docket.
//!
//! Both the agent (`docketd`) and the controller (`docket`) speak the same
//! line protocol and the same tar subset, and both run their work on bounded
//! task pools. Those pieces live here together with the logging and
//! environment configuration used by the binaries.

pub mod config;
pub mod logging;
pub mod pool;
pub mod protocol;
pub mod tar;
pub mod testing;

pub use config::{EnvError, EnvParser, Sourced};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use pool::{PoolError, TaskPool};
pub use protocol::{
    Directive, DirectiveError, EOF_MARKER, MAX_FIELDS, ManifestError, ManifestLine,
    is_ignored_line,
};
pub use tar::{BLOCK_SIZE, HEADER_SIZE, TarError};

/// Default TCP port the agent listens on.
pub const DEFAULT_AGENT_PORT: u16 = 7000;
