//! Per-command output watchers.
//!
//! Each running command job gets one watcher task that drains the child's
//! stdout and stderr line streams into the job's output buffer, so the
//! poller never blocks on a read. The watcher is the only writer of that
//! buffer while the job runs.
//!
//! ```text
//!   child stdout ──┐
//!                  ├──▶ watcher task ──▶ job.output (append)
//!   child stderr ──┘         │
//!                            └──▶ stderr echo for severe lines
//! ```
//!
//! Severe lines — a leading `*`, or the ANSI reverse-video prefix some
//! tools use to flag warnings — are echoed to the parent's stderr no
//! matter the verbosity setting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;

use crate::job::SharedJob;

/// ANSI "reverse video" escape, used by some external tools as an
/// attention marker on warning/error lines.
const REVERSE_VIDEO: &str = "\x1b[7m";

/// Idle delay between line reads while the child is still running.
/// External programs are slow producers; there is no point polling
/// the pipe aggressively until termination is detected.
const IDLE_DELAY: Duration = Duration::from_millis(100);

/// Handle to a running watcher task.
pub(crate) struct Watcher {
    handle: JoinHandle<()>,
    hurry: Arc<AtomicBool>,
}

impl Watcher {
    /// Start a watcher draining the given child pipes into `job`.
    pub(crate) fn spawn(
        index: u64,
        token: String,
        stdout: ChildStdout,
        stderr: ChildStderr,
        job: SharedJob,
        echo: bool,
    ) -> Self {
        let hurry = Arc::new(AtomicBool::new(false));
        let flag = hurry.clone();
        let handle = tokio::spawn(async move {
            drain(index, token, stdout, stderr, job, echo, flag).await;
        });
        Self { handle, hurry }
    }

    /// Tell the watcher the child has terminated: remaining buffered
    /// output should drain without the idle delay.
    pub(crate) fn hurry(&self) {
        self.hurry.store(true, Ordering::Relaxed);
    }

    /// Wait for the watcher to observe end-of-stream. Bounded once the
    /// child has exited, since the pipes close behind it.
    pub(crate) async fn join(self) {
        let _ = self.handle.await;
    }
}

async fn drain(
    index: u64,
    token: String,
    stdout: ChildStdout,
    stderr: ChildStderr,
    job: SharedJob,
    echo: bool,
    hurry: Arc<AtomicBool>,
) {
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        let line = tokio::select! {
            next = out_lines.next_line(), if out_open => match next {
                Ok(Some(line)) => Some(line),
                // EOF; a read error also ends the stream
                _ => {
                    out_open = false;
                    None
                }
            },
            next = err_lines.next_line(), if err_open => match next {
                Ok(Some(line)) => Some(line),
                _ => {
                    err_open = false;
                    None
                }
            },
        };

        let Some(line) = line else { continue };

        job.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .output
            .push(line.clone());

        if is_severe(&line) {
            // Urgent diagnostics bypass verbosity gating entirely.
            eprintln!(">> something happened in job#{index} [{token}]");
            eprintln!("{line}");
        } else if echo {
            println!("{line}");
        }

        if !hurry.load(Ordering::Relaxed) {
            tokio::time::sleep(IDLE_DELAY).await;
        }
    }
}

fn is_severe(line: &str) -> bool {
    line.starts_with('*') || line.starts_with(REVERSE_VIDEO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::job::{Job, JobKind};

    fn shared_job() -> SharedJob {
        Arc::new(Mutex::new(Job::new(0, JobKind::Command, "cat".into())))
    }

    #[test]
    fn severe_markers() {
        assert!(is_severe("* WARNING: something"));
        assert!(is_severe("** ERROR: worse"));
        assert!(is_severe("\x1b[7mhighlighted\x1b[0m"));
        assert!(!is_severe("ordinary progress line"));
    }

    #[tokio::test]
    async fn drains_child_output_into_job() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg("echo one; echo two 1>&2; echo three");
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        let mut child = cmd.spawn().expect("spawn sh");

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let job = shared_job();

        let watcher = Watcher::spawn(0, "abc123".into(), stdout, stderr, job.clone(), false);
        let _ = child.wait().await;
        watcher.hurry();
        watcher.join().await;

        let captured = job.lock().unwrap().output.clone();
        assert_eq!(captured.len(), 3);
        assert!(captured.contains(&"one".to_string()));
        assert!(captured.contains(&"two".to_string()));
        assert!(captured.contains(&"three".to_string()));
    }

    #[tokio::test]
    async fn hurry_drains_buffered_output_quickly() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg("for i in 1 2 3 4 5 6 7 8 9 10; do echo line$i; done");
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        let mut child = cmd.spawn().expect("spawn sh");

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let job = shared_job();

        let watcher = Watcher::spawn(0, "abc123".into(), stdout, stderr, job.clone(), false);
        let _ = child.wait().await;
        watcher.hurry();

        // 10 lines at the idle pace would take ~1s; hurried drain is immediate.
        let joined = tokio::time::timeout(Duration::from_millis(600), watcher.join()).await;
        assert!(joined.is_ok(), "hurried watcher should finish promptly");
        assert_eq!(job.lock().unwrap().output.len(), 10);
    }
}
