//! Command collector.
//!
//! Each command runs with a null stdin. Its stdout and stderr are drained
//! concurrently, on pool tasks when slots are free and inline otherwise, into
//! `<flattened argv>.out` and `.err`. Draining is bounded by the exec timeout;
//! output past the limit is read and thrown away. After a drain finishes the
//! process is killed.

use super::{CollectError, Job};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::debug;

/// Run `argv` (after placeholder expansion) and collect its output.
pub async fn collect_exec(job: &Job, dir: &str, argv: &[String]) {
    let expansion = job.agent.expander.expand_argv(argv).await;

    if let Some((_, placeholder)) = expansion.placeholder
        && expansion.commands.is_empty()
    {
        job.log(format!(
            "Placeholder {placeholder} expanded to nothing, not running {}",
            argv.join(" ")
        ));
        return;
    }

    for command in expansion.commands {
        if let Err(e) = run_command(job, dir, &command).await {
            job.log(e.to_string());
        }
    }
}

/// Entry base name for a command: arguments joined by '_', with '/' and ' '
/// replaced by '_'.
pub fn flatten_name(argv: &[String]) -> String {
    argv.join("_").replace(['/', ' '], "_")
}

async fn run_command(job: &Job, dir: &str, argv: &[String]) -> Result<(), CollectError> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };
    let command_line = argv.join(" ");
    job.log(format!("Running {command_line}"));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| CollectError::Spawn {
            command: command_line.clone(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let child = Arc::new(Mutex::new(child));
    let base = flatten_name(argv);

    let out = drain(
        job.clone(),
        dir.to_string(),
        format!("{base}.out"),
        stdout,
        Arc::clone(&child),
    );
    let err = drain(
        job.clone(),
        dir.to_string(),
        format!("{base}.err"),
        stderr,
        Arc::clone(&child),
    );

    let pool = &job.agent.task_pool;
    match (pool.try_reserve(), pool.try_reserve()) {
        (Ok(out_slot), Ok(err_slot)) => {
            out_slot.spawn(out);
            err_slot.spawn(err);
        }
        (Ok(out_slot), Err(_)) => {
            out_slot.spawn(out);
            err.await;
        }
        (Err(e), _) => {
            debug!("{}; draining {} inline", e, command_line);
            tokio::join!(out, err);
        }
    }
    Ok(())
}

/// Read one output stream into an entry, then kill the process.
async fn drain<R>(job: Job, dir: String, name: String, pipe: Option<R>, child: Arc<Mutex<Child>>)
where
    R: AsyncRead + Unpin,
{
    let config = &job.agent.config;
    let mut captured = Vec::new();

    if let Some(mut pipe) = pipe {
        let limit = config.exec_output_limit;
        let read = tokio::time::timeout(
            config.exec_timeout,
            read_capped(&mut pipe, &mut captured, limit),
        )
        .await;

        match read {
            Ok(Ok(0)) => {}
            Ok(Ok(discarded)) => job.log(format!(
                "Output {name} truncated at {limit} bytes, {discarded} bytes discarded"
            )),
            Ok(Err(e)) => job.log(format!("Failed to read {name}: {e}")),
            Err(_) => job.log(format!(
                "Command for {name} timed out after {}s, killing it",
                config.exec_timeout.as_secs()
            )),
        }
    }

    if !captured.is_empty()
        && let Err(e) = job
            .session
            .send_entry(&job.prefix, &dir, &name, &captured)
            .await
    {
        job.log(e.to_string());
    }

    let mut child = child.lock().await;
    if let Err(e) = child.start_kill() {
        debug!("Kill for {} not delivered: {}", name, e);
    }
    match child.wait().await {
        Ok(status) => debug!("{} finished: {}", name, status),
        Err(e) => debug!("Failed to reap {}: {}", name, e),
    }
}

/// Read `pipe` to the end, keeping at most `limit` bytes.
///
/// Returns the number of bytes read past the limit and thrown away.
async fn read_capped<R>(pipe: &mut R, captured: &mut Vec<u8>, limit: usize) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; 16 * 1024];
    let mut discarded = 0u64;
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(discarded);
        }
        let keep = n.min(limit.saturating_sub(captured.len()));
        captured.extend_from_slice(&chunk[..keep]);
        discarded += (n - keep) as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flatten_name() {
        assert_eq!(flatten_name(&argv(&["/bin/echo", "hi"])), "_bin_echo_hi");
        assert_eq!(
            flatten_name(&argv(&["/usr/bin/cat", "/proc/meminfo"])),
            "_usr_bin_cat__proc_meminfo"
        );
        assert_eq!(flatten_name(&argv(&["uname", "-a b"])), "uname_-a_b");
    }

    #[tokio::test]
    async fn test_read_capped_discards_overflow() {
        let data = vec![b'x'; 5000];
        let mut captured = Vec::new();
        let discarded = read_capped(&mut data.as_slice(), &mut captured, 1024)
            .await
            .unwrap();
        assert_eq!(captured.len(), 1024);
        assert_eq!(discarded, 5000 - 1024);

        let mut captured = Vec::new();
        let discarded = read_capped(&mut &b"short"[..], &mut captured, 1024)
            .await
            .unwrap();
        assert_eq!(captured, b"short");
        assert_eq!(discarded, 0);
    }
}
