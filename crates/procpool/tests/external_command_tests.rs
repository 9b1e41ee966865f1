//! Integration tests for external command jobs.
//!
//! These verify spawning, combined output capture, shell execution, spawn
//! option passthrough, launch faults, and the checked single-command runner.

use procpool::{run_with, JobOptions, Pool, PoolConfig, PoolError, RunOptions};

fn quiet_pool(pool_size: usize) -> Pool {
    Pool::with_config(PoolConfig {
        pool_size,
        verbosity: 0,
    })
}

// ============================================================================
// Basic Capture
// ============================================================================

#[tokio::test]
async fn echo_is_captured_with_timing_and_code() {
    let mut pool = quiet_pool(1);
    pool.submit("echo done");

    let batch = pool.wait().await.expect("batch completes");
    assert_eq!(batch.len(), 1);

    let job = &batch.jobs[0];
    assert_eq!(job.code, Some(0));
    assert_eq!(job.output, vec!["done"]);
    assert!(job.pid.is_some());

    let (start, stop) = (
        job.started_at.expect("started"),
        job.stopped_at.expect("stopped"),
    );
    assert!(stop > start);
    assert!(job.duration().expect("duration") > std::time::Duration::ZERO);
}

#[tokio::test]
async fn stderr_is_captured_alongside_stdout() {
    let mut pool = quiet_pool(1);
    pool.submit_with(
        "echo out; echo err 1>&2",
        JobOptions {
            shell: true,
            ..JobOptions::default()
        },
    );

    let batch = pool.wait().await.expect("batch completes");
    let output = &batch.jobs[0].output;
    assert!(output.contains(&"out".to_string()));
    assert!(output.contains(&"err".to_string()));
}

#[tokio::test]
async fn quoted_arguments_survive_tokenization() {
    let mut pool = quiet_pool(1);
    pool.submit("echo 'hello   world'");

    let batch = pool.wait().await.expect("batch completes");
    assert_eq!(batch.jobs[0].output, vec!["hello   world"]);
}

// ============================================================================
// Exit Codes
// ============================================================================

#[tokio::test]
async fn nonzero_exit_does_not_stop_the_batch() {
    let mut pool = quiet_pool(1);
    pool.submit_with(
        "exit 3",
        JobOptions {
            shell: true,
            ..JobOptions::default()
        },
    );
    pool.submit("echo still running");

    let batch = pool.wait().await.expect("batch completes");
    assert_eq!(batch.codes(), vec![3, 0]);
    assert!(!batch.all_zero());
    assert!(!pool.all_successful());
}

// ============================================================================
// Spawn Options
// ============================================================================

#[tokio::test]
async fn cwd_option_sets_the_working_directory() {
    let mut pool = quiet_pool(1);
    pool.submit_with(
        "pwd",
        JobOptions {
            cwd: Some("/tmp".into()),
            ..JobOptions::default()
        },
    );

    let batch = pool.wait().await.expect("batch completes");
    assert!(
        batch.jobs[0].output[0].contains("tmp"),
        "expected tmp in {:?}",
        batch.jobs[0].output
    );
}

#[tokio::test]
async fn env_option_reaches_the_child() {
    let mut pool = quiet_pool(1);
    pool.submit_with(
        "echo value=$POOL_TEST_VAR",
        JobOptions {
            shell: true,
            env: vec![("POOL_TEST_VAR".to_string(), "present".to_string())],
            ..JobOptions::default()
        },
    );

    let batch = pool.wait().await.expect("batch completes");
    assert_eq!(batch.jobs[0].output, vec!["value=present"]);
}

// ============================================================================
// Launch Faults
// ============================================================================

#[tokio::test]
async fn missing_executable_propagates_a_launch_fault() {
    let mut pool = quiet_pool(1);
    pool.submit("/definitely/not/a/real/binary --flag");

    let err = pool.wait().await.expect_err("launch fault propagates");
    assert!(
        matches!(err, PoolError::Launch { .. }),
        "expected launch fault, got {err}"
    );
}

// ============================================================================
// Checked Runner
// ============================================================================

#[tokio::test]
async fn runner_returns_the_job_record() {
    let opts = RunOptions {
        check: true,
        verbosity: 0,
    };
    let job = run_with("echo hi", opts).await.expect("command succeeds");
    assert_eq!(job.code, Some(0));
    assert_eq!(job.output, vec!["hi"]);
}

#[tokio::test]
async fn runner_converts_nonzero_exit_into_an_error() {
    let opts = RunOptions {
        check: true,
        verbosity: 0,
    };
    let err = run_with("false", opts).await.expect_err("check trips");
    match err {
        PoolError::CommandFailed { command, code } => {
            assert_eq!(command, "false");
            assert_ne!(code, 0);
        }
        other => panic!("expected CommandFailed, got {other}"),
    }
}

#[tokio::test]
async fn runner_without_check_returns_the_failed_job() {
    let opts = RunOptions {
        check: false,
        verbosity: 0,
    };
    let job = run_with("false", opts).await.expect("no check, no error");
    assert_ne!(job.code, Some(0));
}
