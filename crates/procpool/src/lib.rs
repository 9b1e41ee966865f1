//! procpool: run batches of external commands and in-process tasks across a
//! bounded pool of workers.
//!
//! Work is submitted fire-and-forget and executed with at most `pool_size`
//! jobs in flight; `wait()` blocks until the whole batch is done and returns
//! records ordered by submission index regardless of completion order. Each
//! running command gets its own watcher task draining combined output, each
//! task runs on an isolated blocking worker with explicit output sinks, and
//! a results channel carries completions back to the coordinator.
//!
//! ```text
//! submit ──▶ queue ──▶ dispatch ──▶ running ──▶ results channel ──▶ wait
//!                          │                          ▲
//!                 child process / worker ─────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use procpool::Pool;
//!
//! # async fn demo() -> Result<(), procpool::PoolError> {
//! let mut pool = Pool::with_size(4);
//! pool.submit("echo hello");
//! pool.submit_task("square", |_io| Ok(serde_json::json!(7 * 7)));
//!
//! let batch = pool.wait().await?;
//! assert_eq!(batch.codes(), vec![0, 0]);
//! assert!(pool.all_successful());
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod duration;
pub mod error;
pub mod job;
pub mod pool;
pub mod runner;
pub mod task;
pub mod verdict;

mod watcher;

pub use command::{split_line, Work};
pub use duration::{format_duration, DurationStyle};
pub use error::{PoolError, PoolResult};
pub use job::{Job, JobKind, JobStatus};
pub use pool::{default_pool_size, Batch, JobOptions, Pool, PoolConfig};
pub use runner::{run, run_with, RunOptions};
pub use task::{Sink, TaskIo, TaskSpec};
pub use verdict::DEFAULT_ERROR_PATTERN;
