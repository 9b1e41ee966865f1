//! Error types for pool operations.

use thiserror::Error;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by the pool and the single-command runner.
///
/// Job-level failures (nonzero exits, flagged output) are *not* errors —
/// they are recorded on the job and inspected after the batch finishes.
/// Only infrastructural faults propagate.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The child process could not be started at all.
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        /// Display form of the command that failed to start.
        command: String,
        /// The underlying OS error.
        source: std::io::Error,
    },

    /// A command was submitted with no tokens to execute.
    #[error("empty command")]
    EmptyCommand,

    /// The checked runner observed a nonzero exit code.
    #[error("command failed with exit code {code}: `{command}`")]
    CommandFailed {
        /// Display form of the failing command.
        command: String,
        /// The nonzero exit code.
        code: i64,
    },

    /// An invalid regular expression was given to the verdict check.
    #[error("invalid error pattern: {0}")]
    Pattern(#[from] regex::Error),
}
