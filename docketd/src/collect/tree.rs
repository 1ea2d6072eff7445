//! Directory tree collector.
//!
//! The walk itself happens in the calling task. Each regular file becomes
//! its own file-collection task when the pool has room, and is collected
//! inline otherwise. Subdirectories whose names start with '.' are skipped.

use super::{CollectError, Job, collect_file};
use std::path::PathBuf;
use tracing::debug;

pub async fn collect_tree(job: &Job, dir: &str, root: &str) {
    job.log(format!("Collecting tree {root}"));

    let mut stack = vec![PathBuf::from(root)];
    while let Some(current) = stack.pop() {
        if let Err(e) = walk_one(job, dir, current, &mut stack).await {
            job.log(e.to_string());
        }
    }
}

async fn walk_one(
    job: &Job,
    dir: &str,
    current: PathBuf,
    stack: &mut Vec<PathBuf>,
) -> Result<(), CollectError> {
    let walk_err = |path: &PathBuf| {
        let path = path.clone();
        move |source| CollectError::Walk { path, source }
    };

    let mut entries = tokio::fs::read_dir(&current)
        .await
        .map_err(walk_err(&current))?;

    while let Some(entry) = entries.next_entry().await.map_err(walk_err(&current))? {
        let path = entry.path();
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(e) => {
                job.log(format!("Failed to stat {}: {e}", path.display()));
                continue;
            }
        };

        if file_type.is_dir() {
            if entry.file_name().to_string_lossy().starts_with('.') {
                debug!("Skipping hidden directory {}", path.display());
                continue;
            }
            stack.push(path);
        } else if file_type.is_file() {
            dispatch_file(job, dir, path.to_string_lossy().into_owned()).await;
        } else {
            job.log(format!(
                "Skipping {}: not a regular file or directory",
                path.display()
            ));
        }
    }
    Ok(())
}

async fn dispatch_file(job: &Job, dir: &str, path: String) {
    match job.agent.task_pool.try_reserve() {
        Ok(slot) => {
            let job = job.clone();
            let dir = dir.to_string();
            slot.spawn(async move { collect_file(&job, &dir, &path).await });
        }
        Err(e) => {
            debug!("{}; collecting {} inline", e, path);
            collect_file(job, dir, &path).await;
        }
    }
}
