//! Aggregate success determination over finished jobs.
//!
//! Two signals feed the verdict: the authoritative exit codes, and a
//! best-effort scan of captured output for failure markers (many external
//! tools exit zero while printing `** ERROR` style lines). Both must pass.
//! The content scan is a heuristic secondary signal only — it can flag
//! false positives and never substitutes for the exit-code check.

use std::sync::LazyLock;

use regex::Regex;

use crate::job::Job;

/// Default failure pattern: the word "error" (case-insensitive) or two
/// consecutive asterisks, a convention some external tools use to flag
/// failures in plain-text output.
pub const DEFAULT_ERROR_PATTERN: &str = r"(?i)error|\*\*";

static DEFAULT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(DEFAULT_ERROR_PATTERN).expect("default error pattern is valid")
});

pub(crate) fn default_pattern() -> &'static Regex {
    &DEFAULT_PATTERN
}

/// True iff every job exited zero and no captured line matches `pattern`.
///
/// An empty job set is vacuously successful. When `echo` is set, each
/// offending line is printed prefixed with its job index.
pub(crate) fn check(jobs: &[Job], pattern: &Regex, echo: bool) -> bool {
    let all_zero = jobs.iter().all(|job| job.code.unwrap_or(-1) == 0);

    let mut flagged = 0usize;
    for job in jobs {
        for line in &job.output {
            if pattern.is_match(line) {
                if echo {
                    println!("[job#{}] {}", job.index, line);
                }
                flagged += 1;
            }
        }
    }

    all_zero && flagged == 0
}
