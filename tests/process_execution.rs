mod common;
use crate::common::{init_tracing, with_timeout};

use std::sync::Arc;
use std::time::{Duration, Instant};

use procpool::cmdline::{CommandLine, WhichCache};
use procpool::errors::ProcessError;
use procpool::process::ProcessHandle;

fn sh_handle(script: &str) -> ProcessHandle {
    let cmdline = CommandLine::new("sh")
        .arg("-c")
        .unwrap()
        .arg(script)
        .unwrap();
    ProcessHandle::new(cmdline, Arc::new(WhichCache::new()))
}

#[tokio::test]
async fn accepted_exit_codes_widen_success() {
    init_tracing();

    let mut handle = sh_handle("exit 1").accept_exit_codes([0, 1]);
    let lines = with_timeout(handle.execute_return_lines()).await.unwrap();
    assert!(lines.is_empty());
}

#[tokio::test]
async fn non_accepted_exit_code_fails_with_tail() {
    init_tracing();

    let mut handle =
        sh_handle("echo oops: no such file or directory >&2; exit 2").accept_exit_codes([0, 1]);

    let err = with_timeout(handle.execute_return_lines()).await.unwrap_err();
    match &err {
        ProcessError::ProcessFailed { exit_code, output_tail, .. } => {
            assert_eq!(*exit_code, 2);
            assert!(!output_tail.is_empty());
        }
        other => panic!("expected ProcessFailed, got {other:?}"),
    }
    // Callers translate known failure strings from the captured tail.
    assert!(err.output_contains("no such file or directory"));
    assert!(!err.output_contains("permission denied"));
}

#[tokio::test]
async fn missing_command_is_command_not_found() {
    init_tracing();

    let cmdline = CommandLine::new("procpool-definitely-not-a-command");
    let mut handle = ProcessHandle::new(cmdline, Arc::new(WhichCache::new()));

    let err = with_timeout(handle.execute_return_lines()).await.unwrap_err();
    assert!(matches!(err, ProcessError::CommandNotFound(_)));
}

#[tokio::test]
async fn timeout_kills_the_process_within_the_grace_bound() {
    init_tracing();

    let mut handle = sh_handle("sleep 5").with_timeout_secs(1);

    let started = Instant::now();
    let err = handle.execute_no_return().await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        ProcessError::Timeout { timeout_secs, .. } => assert_eq!(timeout_secs, 1),
        other => panic!("expected Timeout, got {other:?}"),
    }
    // 1s timeout + 0.5s SIGTERM grace, with scheduling slack.
    assert!(elapsed < Duration::from_millis(2500), "took {elapsed:?}");
    assert!(!handle.is_executing());
}

#[tokio::test]
async fn handle_is_single_use_until_reset() {
    init_tracing();

    let mut handle = sh_handle("exit 0");
    with_timeout(handle.execute_no_return()).await.unwrap();

    let err = with_timeout(handle.execute_no_return()).await.unwrap_err();
    assert!(matches!(err, ProcessError::InvalidArgument(_)));

    handle.reset();
    with_timeout(handle.execute_no_return()).await.unwrap();
}

#[tokio::test]
async fn return_string_trims_the_trailing_newline_only() {
    init_tracing();

    let mut handle = sh_handle("printf 'a\\nb\\n'");
    let output = with_timeout(handle.execute_return_string()).await.unwrap();
    assert_eq!(output, "a\nb");
}

#[tokio::test]
async fn passthru_reports_exit_code_acceptance() {
    init_tracing();

    let mut ok_handle = sh_handle("exit 0");
    assert!(with_timeout(ok_handle.execute_passthru()).await.unwrap());

    let mut bad_handle = sh_handle("exit 3");
    assert!(!with_timeout(bad_handle.execute_passthru()).await.unwrap());
    assert_eq!(bad_handle.last_exit_code(), Some(3));
}

#[tokio::test]
async fn stderr_never_leaks_into_successful_output() {
    init_tracing();

    let mut handle = sh_handle("echo to-stdout; echo to-stderr >&2");
    let lines = with_timeout(handle.execute_return_lines()).await.unwrap();
    assert_eq!(lines, vec!["to-stdout"]);
}
