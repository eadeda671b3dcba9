mod common;
use crate::common::{init_tracing, with_timeout};

use std::path::PathBuf;
use std::sync::Arc;

use procpool::cmdline::{CommandLine, OutputChannel, WhichCache};
use procpool::errors::ProcessError;
use procpool::process::ProcessHandle;
use procpool::restrict::Restrictions;

#[tokio::test]
async fn allowed_paths_execute_normally() {
    init_tracing();

    let scratch = tempfile::tempdir().unwrap();
    let marker = scratch.path().join("marker");

    let cmdline = CommandLine::new("touch")
        .arg(marker.to_string_lossy())
        .unwrap();
    let mut handle = ProcessHandle::new(cmdline, Arc::new(WhichCache::new()))
        .with_restrictions(Restrictions::rooted_at([scratch.path()]));

    with_timeout(handle.execute_no_return()).await.unwrap();
    assert!(marker.exists());
}

/// A disallowed path argument fails closed: the typed violation arrives
/// before any process is spawned, so the allowed marker is never created
/// either.
#[tokio::test]
async fn violation_fails_before_any_spawn() {
    init_tracing();

    let scratch = tempfile::tempdir().unwrap();
    let marker = scratch.path().join("marker");

    let cmdline = CommandLine::new("touch")
        .arg(marker.to_string_lossy())
        .unwrap()
        .arg("/etc/passwd")
        .unwrap();
    let mut handle = ProcessHandle::new(cmdline, Arc::new(WhichCache::new()))
        .with_restrictions(Restrictions::rooted_at([scratch.path()]));

    let err = with_timeout(handle.execute_no_return()).await.unwrap_err();
    match err {
        ProcessError::RestrictionViolation(path) => {
            assert_eq!(path, PathBuf::from("/etc/passwd"));
        }
        other => panic!("expected RestrictionViolation, got {other:?}"),
    }
    assert!(!marker.exists(), "process must not have been spawned");
}

#[tokio::test]
async fn working_directory_is_checked() {
    init_tracing();

    let scratch = tempfile::tempdir().unwrap();

    let cmdline = CommandLine::new("true").current_dir("/etc").unwrap();
    let mut handle = ProcessHandle::new(cmdline, Arc::new(WhichCache::new()))
        .with_restrictions(Restrictions::rooted_at([scratch.path()]));

    let err = with_timeout(handle.execute_no_return()).await.unwrap_err();
    assert!(matches!(err, ProcessError::RestrictionViolation(_)));
}

#[tokio::test]
async fn output_redirects_need_write_permission() {
    init_tracing();

    let scratch = tempfile::tempdir().unwrap();
    let read_only = scratch.path().join("in");
    let writable = scratch.path().join("out");
    std::fs::create_dir_all(&read_only).unwrap();
    std::fs::create_dir_all(&writable).unwrap();

    let restrictions = Restrictions::new([scratch.path().to_path_buf()], [writable.clone()]);

    // Redirect into the writable prefix: fine.
    let cmdline = CommandLine::new("echo")
        .arg("ok")
        .unwrap()
        .redirect_output(OutputChannel::Stdout, writable.join("log"), false)
        .unwrap();
    let mut handle = ProcessHandle::new(cmdline, Arc::new(WhichCache::new()))
        .with_restrictions(restrictions.clone());
    with_timeout(handle.execute_no_return()).await.unwrap();

    // Redirect into the read-only prefix: write violation.
    let cmdline = CommandLine::new("echo")
        .arg("ok")
        .unwrap()
        .redirect_output(OutputChannel::Stdout, read_only.join("log"), false)
        .unwrap();
    let mut handle = ProcessHandle::new(cmdline, Arc::new(WhichCache::new()))
        .with_restrictions(restrictions);

    let err = with_timeout(handle.execute_no_return()).await.unwrap_err();
    assert!(matches!(err, ProcessError::RestrictionViolation(_)));
}
