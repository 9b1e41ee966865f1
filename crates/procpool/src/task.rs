//! In-process task execution on isolated blocking workers.
//!
//! A task is a closure handed to the pool instead of a command line. It runs
//! on a dedicated blocking worker and writes through explicit output sinks
//! rather than touching the process-wide stdout/stderr: `out` is captured
//! and optionally echoed live, `err` is captured and always mirrored to the
//! parent's stderr so faults are loud by default.
//!
//! Whatever the closure does — return a value, return an error, or panic —
//! exactly one completion is pushed onto the results channel before the
//! worker exits, carrying the return payload (if any) and the captured
//! output in bulk.

use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

/// Closure signature for task jobs.
///
/// The closure receives its output sinks and returns a JSON payload, which
/// becomes the job's `value`. An `Err` (or a panic) marks the job failed
/// with a mirrored nonzero status.
pub type TaskFn = Box<dyn FnOnce(&mut TaskIo) -> anyhow::Result<Value> + Send + 'static>;

/// An in-process computation plus the label it is logged under.
pub struct TaskSpec {
    /// Display label, standing in for a command line in traces.
    pub label: String,
    pub(crate) func: TaskFn,
}

impl TaskSpec {
    /// Package a closure as submittable work.
    pub fn new<F>(label: impl Into<String>, func: F) -> Self
    where
        F: FnOnce(&mut TaskIo) -> anyhow::Result<Value> + Send + 'static,
    {
        Self {
            label: label.into(),
            func: Box::new(func),
        }
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec").field("label", &self.label).finish()
    }
}

/// Where a sink mirrors its writes.
#[derive(Clone, Copy)]
enum Mirror {
    Stdout,
    Stderr,
    Silent,
}

/// A capturing output sink handed to task closures.
///
/// Everything written is appended to an in-memory buffer; depending on the
/// mirror setting it is also forwarded to the parent's stdout or stderr
/// immediately.
pub struct Sink {
    buffer: Arc<Mutex<String>>,
    mirror: Mirror,
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(&text);
        match self.mirror {
            Mirror::Stdout => {
                let mut out = io::stdout();
                out.write_all(buf)?;
                out.flush()?;
            }
            Mirror::Stderr => {
                let mut err = io::stderr();
                err.write_all(buf)?;
                err.flush()?;
            }
            Mirror::Silent => {}
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The sink pair a task closure writes through.
pub struct TaskIo {
    /// Normal output: captured, echoed live only when the pool is verbose.
    pub out: Sink,
    /// Error output: captured and always mirrored to the parent's stderr.
    pub err: Sink,
}

/// Completion payload pushed onto the results channel when work finishes.
#[derive(Debug)]
pub(crate) struct Completion {
    pub(crate) index: u64,
    pub(crate) value: Option<Value>,
    /// `Some` for tasks (bulk output delivery); `None` for the placeholder
    /// the poller pushes for finished commands.
    pub(crate) output: Option<Vec<String>>,
}

impl Completion {
    /// Placeholder entry keeping result collection symmetric across job
    /// kinds: every job yields exactly one channel entry.
    pub(crate) fn placeholder(index: u64) -> Self {
        Self {
            index,
            value: None,
            output: None,
        }
    }
}

/// Buffers backing a task's sinks, surviving a panicking closure.
struct TaskBuffers {
    out: Arc<Mutex<String>>,
    err: Arc<Mutex<String>>,
    echo_out: bool,
}

impl TaskBuffers {
    fn new(echo_out: bool) -> Self {
        Self {
            out: Arc::new(Mutex::new(String::new())),
            err: Arc::new(Mutex::new(String::new())),
            echo_out,
        }
    }

    fn io(&self) -> TaskIo {
        TaskIo {
            out: Sink {
                buffer: self.out.clone(),
                mirror: if self.echo_out { Mirror::Stdout } else { Mirror::Silent },
            },
            err: Sink {
                buffer: self.err.clone(),
                mirror: Mirror::Stderr,
            },
        }
    }

    fn report_fault(&self, index: u64, message: &str) {
        let mut err = Sink {
            buffer: self.err.clone(),
            mirror: Mirror::Stderr,
        };
        let _ = writeln!(err, ">> fault in job#{index}");
        let _ = writeln!(err, "** ERROR: {message}");
    }

    /// Captured lines: normal output first, then error output.
    fn into_lines(self) -> Vec<String> {
        let out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let err = self.err.lock().unwrap_or_else(PoisonError::into_inner);
        out.lines().chain(err.lines()).map(String::from).collect()
    }
}

/// Run a task to completion on the current (blocking) thread.
///
/// Returns the mirrored status: 0 when the closure returned a value,
/// nonzero when it returned an error or panicked. The completion entry is
/// sent on every exit path.
pub(crate) fn execute(
    index: u64,
    spec: TaskSpec,
    echo_out: bool,
    results: UnboundedSender<Completion>,
) -> i64 {
    let buffers = TaskBuffers::new(echo_out);
    let mut io = buffers.io();
    let func = spec.func;

    let outcome = panic::catch_unwind(AssertUnwindSafe(move || func(&mut io)));
    let (status, value) = match outcome {
        Ok(Ok(value)) => (0, Some(value)),
        Ok(Err(fault)) => {
            buffers.report_fault(index, &format!("{fault:#}"));
            (1, None)
        }
        Err(payload) => {
            buffers.report_fault(index, &panic_message(payload.as_ref()));
            (1, None)
        }
    };

    let output = buffers.into_lines();
    let _ = results.send(Completion {
        index,
        value,
        output: Some(output),
    });
    status
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "task panicked".to_string()
    }
}
