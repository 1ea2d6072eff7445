//! Pattern collector.

use super::{CollectError, Job, collect_file};
use std::path::PathBuf;

/// Collect every path matching a shell-style pattern, in match order.
pub async fn collect_glob(job: &Job, dir: &str, pattern: &str) {
    job.log(format!("Collecting glob {pattern}"));

    let owned = pattern.to_string();
    let matched = tokio::task::spawn_blocking(move || expand_pattern(&owned)).await;
    let (paths, unreadable) = match matched {
        Ok(Ok(found)) => found,
        Ok(Err(e)) => {
            job.log(e.to_string());
            return;
        }
        Err(e) => {
            job.log(format!("Glob {pattern} failed: {e}"));
            return;
        }
    };

    for path in &unreadable {
        job.log(format!("Glob {pattern} could not read {}", path.display()));
    }
    if paths.is_empty() {
        job.log(format!("Glob {pattern} matched nothing"));
    }

    for path in paths {
        collect_file(job, dir, &path.to_string_lossy()).await;
    }
}

/// Matches plus the paths that could not be read while matching.
fn expand_pattern(pattern: &str) -> Result<(Vec<PathBuf>, Vec<PathBuf>), CollectError> {
    let entries = ::glob::glob(pattern).map_err(|source| CollectError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut paths = Vec::new();
    let mut unreadable = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) => paths.push(path),
            Err(e) => unreadable.push(e.path().to_path_buf()),
        }
    }
    Ok((paths, unreadable))
}
