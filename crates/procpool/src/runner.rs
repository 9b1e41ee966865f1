//! Run one command and check it — a convenience over a one-slot pool.

use crate::command::Work;
use crate::error::{PoolError, PoolResult};
use crate::job::Job;
use crate::pool::{Pool, PoolConfig};

/// Options for the single-command runner.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Convert a nonzero exit code into [`PoolError::CommandFailed`].
    pub check: bool,
    /// Trace verbosity; defaults to 2 so the command's output streams live.
    pub verbosity: u8,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            check: true,
            verbosity: 2,
        }
    }
}

/// Run a single command with default options: output echoed live, nonzero
/// exit converted into an error naming the failing command line.
pub async fn run(work: impl Into<Work>) -> PoolResult<Job> {
    run_with(work, RunOptions::default()).await
}

/// Run a single command with explicit options and return its job record.
pub async fn run_with(work: impl Into<Work>, opts: RunOptions) -> PoolResult<Job> {
    let mut pool = Pool::with_config(PoolConfig {
        pool_size: 1,
        verbosity: opts.verbosity,
    });
    pool.submit(work);

    let batch = pool.wait().await?;
    let job = match batch.jobs.into_iter().next() {
        Some(job) => job,
        None => unreachable!("one submitted job yields one record"),
    };

    if opts.check && !job.ok() {
        return Err(PoolError::CommandFailed {
            command: job.display.clone(),
            code: job.code.unwrap_or(-1),
        });
    }
    Ok(job)
}
