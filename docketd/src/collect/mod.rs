//! Collectors: turn one directive into zero or more archive entries.
//!
//! Every collector runs as a task on the agent's task pool and carries a
//! [`Job`], which pins the session's pending count until it is dropped.
//! Problems are reported into the session log; a collector never fails the
//! session.

mod exec;
mod file;
mod glob;
mod tree;

pub use exec::{collect_exec, flatten_name};
pub use file::collect_file;
pub use glob::collect_glob;
pub use tree::collect_tree;

use crate::AgentContext;
use crate::session::{EntryError, PendingTask};
use docket_common::Directive;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Everything a collector needs: agent state, the session it writes to, and
/// the prefix in force when its directive was read.
#[derive(Clone)]
pub struct Job {
    pub agent: Arc<AgentContext>,
    pub session: PendingTask,
    pub prefix: Arc<str>,
}

impl Job {
    pub fn new(agent: Arc<AgentContext>, session: PendingTask, prefix: Arc<str>) -> Self {
        Self {
            agent,
            session,
            prefix,
        }
    }

    pub fn log(&self, line: impl AsRef<str>) {
        self.session.log(line);
    }
}

/// Failures reported into the session log.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Failed to open file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stat file {path}: {source}")]
    Stat {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File {0} is not a regular file")]
    NotRegular(String),

    #[error("Invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: ::glob::PatternError,
    },

    #[error("Failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Entry(#[from] EntryError),
}

/// Run a collecting directive to completion.
///
/// `SetPrefix` is handled by the connection reader and is ignored here.
pub async fn run(job: Job, directive: Directive) {
    match directive {
        Directive::SetPrefix(_) => {}
        Directive::CollectFile { dir, path } => collect_file(&job, &dir, &path).await,
        Directive::CollectGlob { dir, pattern } => collect_glob(&job, &dir, &pattern).await,
        Directive::CollectTree { dir, path } => collect_tree(&job, &dir, &path).await,
        Directive::CollectExec { dir, argv } => collect_exec(&job, &dir, &argv).await,
    }
}
