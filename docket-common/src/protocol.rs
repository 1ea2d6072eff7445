//! Control protocol and manifest grammar.
//!
//! The controller sends each agent a `|`-separated, newline-terminated list of
//! directives ending in a bare `EOF` line:
//!
//! ```text
//! PREFIX|<name>
//! FILE|<dir>|<path>
//! GLOB|<dir>|<glob-pattern>
//! TREE|<dir>|<root-path>
//! EXEC|<dir>|<argv0>|<argv1>|...
//! EOF
//! ```
//!
//! The controller itself reads a manifest of `<ip> <name> <instruction-file>`
//! lines.

use std::path::PathBuf;
use thiserror::Error;

/// Line that ends directive intake on the agent.
pub const EOF_MARKER: &str = "EOF";

/// Maximum number of `|`-separated fields considered on one line.
pub const MAX_FIELDS: usize = 20;

/// One parsed control line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Set the archive prefix for entries collected after this line.
    SetPrefix(String),
    /// Collect one file.
    CollectFile { dir: String, path: String },
    /// Collect every file matching a shell-style pattern.
    CollectGlob { dir: String, pattern: String },
    /// Collect every regular file below a directory.
    CollectTree { dir: String, path: String },
    /// Run a command and collect its stdout and stderr.
    CollectExec { dir: String, argv: Vec<String> },
}

/// Why a control line could not be turned into a [`Directive`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    #[error("empty directive line")]
    Empty,

    #[error("Not enough arguments to {verb} collector, got {got} args")]
    MissingArguments { verb: String, got: usize },

    #[error("Unknown collector requested '{0}'")]
    Unknown(String),
}

impl Directive {
    /// Parse one line (without its trailing newline).
    ///
    /// Empty fields are skipped, so `FILE||/etc/hosts` has only two fields.
    pub fn parse(line: &str) -> Result<Self, DirectiveError> {
        let fields: Vec<&str> = line
            .split('|')
            .filter(|f| !f.is_empty())
            .take(MAX_FIELDS)
            .collect();

        let Some((verb, args)) = fields.split_first() else {
            return Err(DirectiveError::Empty);
        };

        let need = |n: usize| {
            if fields.len() >= n {
                Ok(())
            } else {
                Err(DirectiveError::MissingArguments {
                    verb: (*verb).to_string(),
                    got: fields.len(),
                })
            }
        };

        match *verb {
            "PREFIX" => {
                need(2)?;
                Ok(Self::SetPrefix(args[0].to_string()))
            }
            "FILE" => {
                need(3)?;
                Ok(Self::CollectFile {
                    dir: args[0].to_string(),
                    path: args[1].to_string(),
                })
            }
            "GLOB" => {
                need(3)?;
                Ok(Self::CollectGlob {
                    dir: args[0].to_string(),
                    pattern: args[1].to_string(),
                })
            }
            "TREE" => {
                need(3)?;
                Ok(Self::CollectTree {
                    dir: args[0].to_string(),
                    path: args[1].to_string(),
                })
            }
            "EXEC" => {
                need(3)?;
                Ok(Self::CollectExec {
                    dir: args[0].to_string(),
                    argv: args[1..].iter().map(|a| (*a).to_string()).collect(),
                })
            }
            other => Err(DirectiveError::Unknown(other.to_string())),
        }
    }

    /// Short verb for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::SetPrefix(_) => "PREFIX",
            Self::CollectFile { .. } => "FILE",
            Self::CollectGlob { .. } => "GLOB",
            Self::CollectTree { .. } => "TREE",
            Self::CollectExec { .. } => "EXEC",
        }
    }
}

/// Lines skipped by both the agent and the manifest reader.
pub fn is_ignored_line(line: &str) -> bool {
    line.trim().is_empty() || line.starts_with('#')
}

/// One `<ip> <name> <instruction-file>` manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLine {
    pub ip: String,
    pub name: String,
    pub instructions: PathBuf,
}

/// Why a manifest line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("No IP on the line: '{0}'")]
    MissingIp(String),

    #[error("No name on the line: '{0}'")]
    MissingName(String),

    #[error("No list file on the line: '{0}'")]
    MissingInstructions(String),
}

impl ManifestLine {
    /// Parse a manifest line; fields are separated by spaces or tabs and
    /// anything after the third field is ignored.
    pub fn parse(line: &str) -> Result<Self, ManifestError> {
        let mut fields = line
            .split([' ', '\t'])
            .filter(|f| !f.is_empty());

        let ip = fields
            .next()
            .ok_or_else(|| ManifestError::MissingIp(line.to_string()))?;
        let name = fields
            .next()
            .ok_or_else(|| ManifestError::MissingName(line.to_string()))?;
        let instructions = fields
            .next()
            .ok_or_else(|| ManifestError::MissingInstructions(line.to_string()))?;

        Ok(Self {
            ip: ip.to_string(),
            name: name.to_string(),
            instructions: PathBuf::from(instructions),
        })
    }
}
