//! Job records — one per submitted unit of work.
//!
//! A job moves through exactly one of three states: queued, running,
//! finished. The record is created when the job is dispatched (not when it
//! is submitted), so `started_at` reflects the actual launch rather than
//! time spent waiting for a free slot.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serde_json::Value;

/// What kind of work a job carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// An external command run as a child process.
    Command,
    /// An in-process computation run on a blocking worker.
    Task,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Command => write!(f, "command"),
            JobKind::Task => write!(f, "task"),
        }
    }
}

/// Lifecycle state of a job, derived from its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Submitted but not yet dispatched.
    Queued,
    /// Dispatched and not yet finished.
    Running,
    /// Finished with a recorded exit code.
    Finished,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "Queued"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Finished => write!(f, "Finished"),
        }
    }
}

/// One submitted unit of work, tracked through its whole lifecycle.
///
/// `index` is the submission-order sequence number and the only valid sort
/// key for result ordering — PIDs are recycled by the OS and worker handles
/// are reused, so neither is a stable key.
#[derive(Debug, Clone)]
pub struct Job {
    /// Submission-order index, unique within a batch.
    pub index: u64,
    /// Tagged variant: external command or in-process task.
    pub kind: JobKind,
    /// Human-readable rendering of the work, for logs.
    pub display: String,
    /// Short random token for disambiguating interleaved trace lines.
    pub token: String,
    /// OS process id once dispatched; `None` for tasks and queued jobs.
    pub pid: Option<u32>,
    /// Captured output lines, in the order they were produced.
    ///
    /// Commands are drained line by line while running; tasks deliver
    /// their captured output in bulk when the worker exits.
    pub output: Vec<String>,
    /// Wall-clock launch time.
    pub started_at: Option<SystemTime>,
    /// Wall-clock completion time; `None` until the job finishes.
    pub stopped_at: Option<SystemTime>,
    /// Exit code (commands) or mirrored status (tasks: 0 = returned,
    /// nonzero = fault). `None` until the job finishes.
    pub code: Option<i64>,
    /// Return payload of a task job; always `None` for commands.
    pub value: Option<Value>,
}

impl Job {
    pub(crate) fn new(index: u64, kind: JobKind, display: String) -> Self {
        Self {
            index,
            kind,
            display,
            token: generate_token(),
            pid: None,
            output: Vec::new(),
            started_at: None,
            stopped_at: None,
            code: None,
            value: None,
        }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> JobStatus {
        if self.code.is_some() {
            JobStatus::Finished
        } else if self.started_at.is_some() {
            JobStatus::Running
        } else {
            JobStatus::Queued
        }
    }

    /// True once the job finished with exit code zero.
    pub fn ok(&self) -> bool {
        self.code == Some(0)
    }

    /// Wall-clock run time, once both timestamps are recorded.
    pub fn duration(&self) -> Option<Duration> {
        let (start, stop) = (self.started_at?, self.stopped_at?);
        Some(stop.duration_since(start).unwrap_or_default())
    }
}

/// Shared handle to a live job record.
///
/// Single-writer discipline per field: the poller writes lifecycle fields,
/// the job's own watcher or executor writes `output` and `value`. The mutex
/// guards only short field accesses, never I/O.
pub(crate) type SharedJob = Arc<Mutex<Job>>;

/// Generate a 6-character hex correlation token using RandomState + SystemTime.
fn generate_token() -> String {
    let state = RandomState::new();
    let mut hasher = state.build_hasher();

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    hasher.write_u128(now.as_nanos());

    format!("{:06x}", hasher.finish() & 0xff_ffff)
}
