//! The pool — queued work, slot-limited dispatch, and batch completion.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Pool                                  │
//! │                                                                  │
//! │  submit() ──▶ queue ──▶ dispatch() ──▶ running (≤ pool_size)     │
//! │                              │                                   │
//! │                   ┌──────────┴───────────┐                       │
//! │              child process         blocking worker               │
//! │                   │                      │                       │
//! │             watcher task           task executor                 │
//! │            (line-by-line)         (bulk at exit)                 │
//! │                   │                      │                       │
//! │                   └──▶ results channel ◀─┘                       │
//! │                              │                                   │
//! │  wait() ◀── poll loop ◀── drain ──▶ ordered Batch by index       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One coordinating task runs `wait()`; it dispatches queued jobs whenever a
//! slot frees up, polls liveness without blocking, and drains the results
//! channel. At most `pool_size` jobs run concurrently. Watcher tasks do not
//! count against slots — they only read output.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use regex::RegexBuilder;
use serde_json::Value;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::command::{self, Exec, Work};
use crate::duration::{format_duration, DurationStyle};
use crate::error::{PoolError, PoolResult};
use crate::job::{Job, SharedJob};
use crate::task::{self, Completion, TaskIo, TaskSpec};
use crate::verdict;
use crate::watcher::Watcher;

/// Poll interval of the wait loop. Jobs are expected to run for orders of
/// magnitude longer than this, so coarse polling costs nothing.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pool configuration, fixed at construction.
///
/// Verbosity is carried explicitly rather than read from process-global
/// state: 0 is silent, 1 prints job start/finish traces and the batch
/// summary, 2 additionally echoes captured job output live.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of concurrently running jobs.
    pub pool_size: usize,
    /// Trace verbosity (0 silent, 1 traces, 2 echo output).
    pub verbosity: u8,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            verbosity: 1,
        }
    }
}

/// Default slot count: three quarters of the logical CPUs, at least one.
pub fn default_pool_size() -> usize {
    (num_cpus::get() * 3 / 4).max(1)
}

/// Per-job spawn options for command work.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Execute through the shell (`sh -c`). Controls normalization: free
    /// text stays a single string, argument lists are joined.
    pub shell: bool,
    /// Working directory for the child process.
    pub cwd: Option<PathBuf>,
    /// Additional environment variables for the child process.
    pub env: Vec<(String, String)>,
    /// Start the child from an empty environment.
    pub clear_env: bool,
}

/// A submitted job waiting for a free slot.
struct Queued {
    index: u64,
    exec: Exec,
    opts: JobOptions,
}

/// Live handle of a dispatched job.
enum Handle {
    Child { child: Child, watcher: Watcher },
    Worker(JoinHandle<i64>),
}

/// A dispatched job plus its live handle. The handle → job association is
/// only valid while the job runs; afterwards lookups go through `index`.
struct Running {
    index: u64,
    job: SharedJob,
    handle: Handle,
}

/// The finished jobs of one `wait()` call, ordered by submission index.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Job records sorted by `index`, one per submitted job.
    pub jobs: Vec<Job>,
}

impl Batch {
    /// Ordered task return values; `None` for command jobs.
    pub fn values(&self) -> Vec<Option<Value>> {
        self.jobs.iter().map(|job| job.value.clone()).collect()
    }

    /// Ordered exit codes (`-1` for a job that never finished).
    pub fn codes(&self) -> Vec<i64> {
        self.jobs.iter().map(|job| job.code.unwrap_or(-1)).collect()
    }

    /// True if every job exited zero.
    pub fn all_zero(&self) -> bool {
        self.codes().iter().all(|code| *code == 0)
    }

    /// Number of jobs in the batch.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True for a batch with no jobs.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Runs queued commands and tasks across a bounded pool of workers.
///
/// Submission is fire-and-forget; `wait()` blocks until the whole queued
/// batch has finished and returns the records in submission order. Per-batch
/// counters reset after each `wait()`, while the full job history is kept
/// for lifetime-level auditing (an explicit retention policy — callers that
/// need bounded memory should snapshot and [`clear_history`](Pool::clear_history)).
pub struct Pool {
    config: PoolConfig,
    queue: VecDeque<Queued>,
    running: Vec<Running>,
    /// Index → job for the current batch; cleared after each `wait()`.
    batch: BTreeMap<u64, SharedJob>,
    /// Every job ever dispatched, across all batches.
    history: Vec<SharedJob>,
    next_index: u64,
    results_tx: UnboundedSender<Completion>,
    results_rx: UnboundedReceiver<Completion>,
}

impl Pool {
    /// Create a pool with the default configuration.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Create a pool with the given slot count.
    pub fn with_size(pool_size: usize) -> Self {
        Self::with_config(PoolConfig {
            pool_size,
            ..PoolConfig::default()
        })
    }

    /// Create a pool with an explicit configuration.
    pub fn with_config(config: PoolConfig) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            config: PoolConfig {
                pool_size: config.pool_size.max(1),
                ..config
            },
            queue: VecDeque::new(),
            running: Vec::new(),
            batch: BTreeMap::new(),
            history: Vec::new(),
            next_index: 0,
            results_tx,
            results_rx,
        }
    }

    /// Enqueue work with default options. Returns immediately; results are
    /// collected by the next [`wait`](Pool::wait).
    pub fn submit(&mut self, work: impl Into<Work>) {
        self.submit_with(work, JobOptions::default());
    }

    /// Enqueue work with explicit spawn options.
    pub fn submit_with(&mut self, work: impl Into<Work>, opts: JobOptions) {
        let exec = command::normalize(work.into(), opts.shell);
        self.queue.push_back(Queued {
            index: self.next_index,
            exec,
            opts,
        });
        self.next_index += 1;
    }

    /// Enqueue an in-process task under the given display label.
    pub fn submit_task<F>(&mut self, label: impl Into<String>, func: F)
    where
        F: FnOnce(&mut TaskIo) -> anyhow::Result<Value> + Send + 'static,
    {
        self.submit(TaskSpec::new(label, func));
    }

    /// Move queued jobs into free slots, launching their processes/workers.
    ///
    /// Non-blocking. The job record is materialized here rather than at
    /// submission so `started_at` reflects the actual launch, not time
    /// spent queued behind a full pool.
    fn dispatch(&mut self) -> PoolResult<()> {
        while self.running.len() < self.config.pool_size {
            let Some(Queued { index, exec, opts }) = self.queue.pop_front() else {
                break;
            };

            let display_str = command::display(&exec);
            let mut record = Job::new(index, exec.kind(), display_str.clone());
            record.started_at = Some(SystemTime::now());
            let token = record.token.clone();

            if self.config.verbosity >= 1 {
                println!(">> job#{index} [{token}]: {display_str}");
            }

            let job: SharedJob = Arc::new(Mutex::new(record));
            let handle = match exec {
                Exec::Argv(argv) => self.launch_command(index, &token, &display_str, argv, &opts, &job)?,
                Exec::Shell(line) => {
                    let argv = vec!["sh".to_string(), "-c".to_string(), line];
                    self.launch_command(index, &token, &display_str, argv, &opts, &job)?
                }
                Exec::Task(spec) => {
                    let results = self.results_tx.clone();
                    let echo = self.config.verbosity > 1;
                    let worker =
                        tokio::task::spawn_blocking(move || task::execute(index, spec, echo, results));
                    Handle::Worker(worker)
                }
            };

            tracing::debug!(index, command = %display_str, "dispatched job");
            self.batch.insert(index, job.clone());
            self.history.push(job.clone());
            self.running.push(Running { index, job, handle });
        }
        Ok(())
    }

    fn launch_command(
        &self,
        index: u64,
        token: &str,
        display: &str,
        argv: Vec<String>,
        opts: &JobOptions,
        job: &SharedJob,
    ) -> PoolResult<Handle> {
        let (program, args) = argv.split_first().ok_or(PoolError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = &opts.cwd {
            cmd.current_dir(dir);
        }
        if opts.clear_env {
            cmd.env_clear();
        }
        for (key, value) in &opts.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| PoolError::Launch {
            command: display.to_string(),
            source,
        })?;

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => (out, err),
            _ => {
                return Err(PoolError::Launch {
                    command: display.to_string(),
                    source: std::io::Error::other("child stdio was not captured"),
                })
            }
        };

        job.lock().unwrap_or_else(PoisonError::into_inner).pid = child.id();

        let watcher = Watcher::spawn(
            index,
            token.to_string(),
            stdout,
            stderr,
            job.clone(),
            self.config.verbosity > 1,
        );
        Ok(Handle::Child { child, watcher })
    }

    /// Non-blocking liveness sweep over the running set.
    async fn poll_running(&mut self) {
        let entries = std::mem::take(&mut self.running);
        for entry in entries {
            let Running { index, job, handle } = entry;
            match handle {
                Handle::Child { mut child, watcher } => {
                    let exited = match child.try_wait() {
                        Ok(Some(status)) => Some(status.code().map(i64::from).unwrap_or(-1)),
                        Ok(None) => None,
                        Err(err) => {
                            tracing::warn!(index, error = %err, "failed to poll child, marking failed");
                            Some(-1)
                        }
                    };
                    match exited {
                        Some(code) => {
                            // Termination means the remaining output is fully
                            // buffered; the hurried watcher drains it and ends.
                            watcher.hurry();
                            watcher.join().await;
                            self.finish(index, &job, code);
                            let _ = self.results_tx.send(Completion::placeholder(index));
                        }
                        None => self.running.push(Running {
                            index,
                            job,
                            handle: Handle::Child { child, watcher },
                        }),
                    }
                }
                Handle::Worker(worker) => {
                    if worker.is_finished() {
                        let code = match worker.await {
                            Ok(status) => status,
                            Err(err) => {
                                tracing::error!(index, error = %err, "task worker died");
                                1
                            }
                        };
                        self.finish(index, &job, code);
                    } else {
                        self.running.push(Running {
                            index,
                            job,
                            handle: Handle::Worker(worker),
                        });
                    }
                }
            }
        }
    }

    fn finish(&self, index: u64, job: &SharedJob, code: i64) {
        let (token, elapsed) = {
            let mut record = job.lock().unwrap_or_else(PoisonError::into_inner);
            record.stopped_at = Some(SystemTime::now());
            record.code = Some(code);
            (record.token.clone(), record.duration().unwrap_or_default())
        };
        tracing::debug!(index, code, "job finished");
        if self.config.verbosity >= 1 {
            println!(
                ">> job#{index} [{token}] finished in {}.",
                format_duration(elapsed, DurationStyle::Standard)
            );
        }
    }

    /// Merge everything currently sitting in the results channel into the
    /// batch's job records.
    fn drain_results(&mut self) {
        while let Ok(done) = self.results_rx.try_recv() {
            let Some(job) = self.batch.get(&done.index) else {
                tracing::warn!(index = done.index, "completion for unknown job");
                continue;
            };
            let mut record = job.lock().unwrap_or_else(PoisonError::into_inner);
            record.value = done.value;
            if let Some(lines) = done.output {
                record.output = lines;
            }
        }
    }

    /// Wait for every queued and running job to finish.
    ///
    /// Returns the batch in submission order regardless of completion
    /// order. Per-batch counters reset afterwards; history is retained.
    pub async fn wait(&mut self) -> PoolResult<Batch> {
        self.wait_with(None).await
    }

    /// Like [`wait`](Pool::wait), with a temporary slot-count override for
    /// this batch only.
    pub async fn wait_with(&mut self, pool_size: Option<usize>) -> PoolResult<Batch> {
        let saved = self.config.pool_size;
        if let Some(size) = pool_size {
            self.config.pool_size = size.max(1);
        }
        let outcome = self.drain_batch().await;
        self.config.pool_size = saved;
        outcome
    }

    async fn drain_batch(&mut self) -> PoolResult<Batch> {
        let started = Instant::now();
        let submitted = self.next_index;

        while !self.running.is_empty() || !self.queue.is_empty() {
            self.dispatch()?;
            self.poll_running().await;
            self.drain_results();
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        // One final drain for a push that raced the last poll.
        self.drain_results();

        let jobs: Vec<Job> = self
            .batch
            .values()
            .map(|job| job.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect();

        if self.config.verbosity >= 1 {
            self.print_summary(submitted, &jobs, started.elapsed());
        }

        self.next_index = 0;
        self.batch.clear();

        Ok(Batch { jobs })
    }

    fn print_summary(&self, submitted: u64, jobs: &[Job], elapsed: Duration) {
        println!(
            ">> all {submitted} jobs done in {}.",
            format_duration(elapsed, DurationStyle::Standard)
        );
        let codes: Vec<i64> = jobs.iter().map(|job| job.code.unwrap_or(-1)).collect();
        if codes.iter().any(|code| *code != 0) {
            println!("exit codes: {codes:?}");
        } else {
            println!("all exit codes are 0.");
        }
        if verdict::check(jobs, verdict::default_pattern(), true) {
            println!(">> all {} jobs finished successfully.", jobs.len());
        } else {
            println!(">> please pay attention to the errors above.");
        }
    }

    /// Aggregate verdict over the full job history with the default
    /// failure pattern: true iff every job exited zero and no captured
    /// line matches [`DEFAULT_ERROR_PATTERN`](crate::verdict::DEFAULT_ERROR_PATTERN).
    pub fn all_successful(&self) -> bool {
        verdict::check(
            &self.history(),
            verdict::default_pattern(),
            self.config.verbosity >= 1,
        )
    }

    /// Aggregate verdict with a custom failure pattern (matched
    /// case-insensitively) over the given jobs, or the full history when
    /// `jobs` is `None`.
    pub fn all_successful_where(&self, pattern: &str, jobs: Option<&[Job]>) -> PoolResult<bool> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        let echo = self.config.verbosity >= 1;
        Ok(match jobs {
            Some(jobs) => verdict::check(jobs, &pattern, echo),
            None => verdict::check(&self.history(), &pattern, echo),
        })
    }

    /// Snapshot of every job dispatched over this pool's lifetime.
    pub fn history(&self) -> Vec<Job> {
        self.history
            .iter()
            .map(|job| job.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    /// Drop the retained history. Only affects auditing; the current
    /// batch's bookkeeping is untouched.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// The configured slot count.
    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    /// Number of jobs waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Number of jobs currently running.
    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Split `total` items into index ranges, roughly ten per pool slot —
    /// a convenience for grouping many small items into fewer, larger task
    /// jobs. Recomputed on every call, so the sequence can be restarted.
    pub fn batches(&self, total: usize) -> impl Iterator<Item = Range<usize>> {
        let size = total.div_ceil(self.config.pool_size * 10).max(1);
        self.batches_sized(total, size)
    }

    /// Split `total` items into index ranges of at most `size`.
    pub fn batches_sized(&self, total: usize, size: usize) -> impl Iterator<Item = Range<usize>> {
        let size = size.max(1);
        (0..total)
            .step_by(size)
            .map(move |start| start..(start + size).min(total))
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(pool_size: usize) -> Pool {
        Pool::with_config(PoolConfig {
            pool_size,
            verbosity: 0,
        })
    }

    #[test]
    fn pool_size_is_never_zero() {
        let pool = quiet(0);
        assert_eq!(pool.pool_size(), 1);
        assert!(default_pool_size() >= 1);
    }

    #[test]
    fn submit_counts_queued_jobs() {
        let mut pool = quiet(2);
        pool.submit("true");
        pool.submit(vec!["echo", "hi"]);
        assert_eq!(pool.queued(), 2);
        assert_eq!(pool.running(), 0);
    }

    #[test]
    fn batches_cover_total_without_overlap() {
        let pool = quiet(4);
        let ranges: Vec<_> = pool.batches(103).collect();
        let mut covered = 0usize;
        for range in &ranges {
            assert_eq!(range.start, covered);
            covered = range.end;
        }
        assert_eq!(covered, 103);
        // About ten ranges per slot.
        assert!(ranges.len() <= 4 * 10 + 1);
    }

    #[test]
    fn batches_sized_clamps_last_range() {
        let pool = quiet(1);
        let ranges: Vec<_> = pool.batches_sized(10, 4).collect();
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
    }

    #[test]
    fn batches_of_nothing_is_empty() {
        let pool = quiet(1);
        assert_eq!(pool.batches(0).count(), 0);
    }

    #[test]
    fn empty_batch_values_and_codes() {
        let batch = Batch { jobs: Vec::new() };
        assert!(batch.is_empty());
        assert!(batch.all_zero());
        assert!(batch.values().is_empty());
    }

    #[tokio::test]
    async fn wait_on_empty_queue_returns_empty_batch() {
        let mut pool = quiet(2);
        let batch = pool.wait().await.expect("empty wait succeeds");
        assert!(batch.is_empty());
    }
}
