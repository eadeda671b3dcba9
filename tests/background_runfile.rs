mod common;
use crate::common::init_tracing;

use std::sync::Arc;
use std::time::Duration;

use procpool::cmdline::{CommandLine, WhichCache};
use procpool::errors::ProcessError;
use procpool::process::{ProcessHandle, RunDir, pid_alive};

fn background_handle(run_dir: &RunDir, key: &str, script: &str) -> ProcessHandle {
    let cmdline = CommandLine::new("sh")
        .arg("-c")
        .unwrap()
        .arg(script)
        .unwrap();
    ProcessHandle::new(cmdline, Arc::new(WhichCache::new()))
        .with_run_file(run_dir.run_file(key))
}

#[tokio::test]
async fn background_process_lifecycle_and_run_file_cleanup() {
    init_tracing();

    let scratch = tempfile::tempdir().unwrap();
    let run_dir = RunDir::new(scratch.path().join("run")).unwrap();

    let mut handle = background_handle(&run_dir, "bg-sleep", "sleep 2");
    let pid = handle.execute_background().await.unwrap();

    assert!(pid > 0);
    assert!(run_dir.run_file("bg-sleep").exists());
    assert!(handle.is_executing());
    assert!(!handle.is_finished());

    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(handle.is_finished());
    assert!(!handle.is_executing());
    // is_finished cleaned up the stale PID record.
    assert!(!run_dir.run_file("bg-sleep").exists());
}

#[tokio::test]
async fn run_file_alone_recovers_liveness_state() {
    init_tracing();

    let scratch = tempfile::tempdir().unwrap();
    let run_dir = RunDir::new(scratch.path().join("run")).unwrap();

    let mut handle = background_handle(&run_dir, "bg-recover", "sleep 2");
    let pid = handle.execute_background().await.unwrap();

    // A restarted supervisor only has the run-file directory.
    let recovered = run_dir.scan("bg-").unwrap();
    assert_eq!(recovered, vec![("bg-recover".to_string(), pid)]);
    assert!(pid_alive(pid));

    handle.kill(15).unwrap();
}

#[tokio::test]
async fn kill_is_a_no_op_on_a_dead_process() {
    init_tracing();

    let scratch = tempfile::tempdir().unwrap();
    let run_dir = RunDir::new(scratch.path().join("run")).unwrap();

    let mut handle = background_handle(&run_dir, "bg-kill", "sleep 30");
    let pid = handle.execute_background().await.unwrap();

    handle.kill(15).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!pid_alive(pid));
    assert!(handle.is_finished());

    // Killing again after exit is fine.
    handle.kill(15).unwrap();
}

#[tokio::test]
async fn kill_rejects_a_malformed_signal_number() {
    init_tracing();

    let scratch = tempfile::tempdir().unwrap();
    let run_dir = RunDir::new(scratch.path().join("run")).unwrap();
    let handle = background_handle(&run_dir, "bg-sig", "sleep 1");

    let err = handle.kill(-4).unwrap_err();
    assert!(matches!(err, ProcessError::InvalidArgument(_)));
}
