mod common;
use crate::common::{init_tracing, with_timeout};

use std::sync::Arc;
use std::time::Duration;

use procpool::cmdline::{CommandLine, WhichCache};
use procpool::errors::ProcessError;
use procpool::pool::{RealWorkerSpawner, Supervisor, WorkerCommand, WorkerOutcome};
use procpool::process::{ProcessHandle, RunDir};
use procpool::restrict::Restrictions;
use procpool_test_utils::builders::PoolSettingsBuilder;
use procpool_test_utils::fake_spawner::FakeWorkerSpawner;

#[tokio::test]
async fn real_workers_process_every_item() {
    init_tracing();

    let scratch = tempfile::tempdir().unwrap();
    let run_dir = RunDir::new(scratch.path().join("run")).unwrap();
    let out_file = scratch.path().join("out.txt");

    let command = WorkerCommand::new("sh")
        .arg("-c")
        .arg(format!("echo {{}} >> {}", out_file.display()));

    let settings = PoolSettingsBuilder::new("real").max_workers(2).build();
    let (tx, rx) = Supervisor::<RealWorkerSpawner>::channel();
    let spawner = RealWorkerSpawner::new(
        tx,
        command,
        Arc::new(WhichCache::new()),
        Restrictions::allow_all(),
        run_dir.clone(),
    );

    let values: Vec<String> = ["alpha", "beta", "gamma", "delta"]
        .into_iter()
        .map(String::from)
        .collect();

    let (supervisor, _stop) = Supervisor::new(settings, values, spawner, rx).unwrap();
    let supervisor = supervisor.with_run_dir(run_dir.clone());
    let report = with_timeout(supervisor.start()).await.unwrap();

    assert_eq!(report.outcomes.len(), 4);
    assert!(report.all_succeeded(), "failed: {:?}", report.failed_keys());

    let mut written: Vec<String> = std::fs::read_to_string(&out_file)
        .unwrap()
        .lines()
        .map(String::from)
        .collect();
    written.sort();
    assert_eq!(written, vec!["alpha", "beta", "delta", "gamma"]);

    // Every run-file was cleaned up on completion.
    assert!(run_dir.scan("real-").unwrap().is_empty());
}

#[tokio::test]
async fn overdue_workers_time_out_instead_of_hanging_the_pool() {
    init_tracing();

    let scratch = tempfile::tempdir().unwrap();
    let run_dir = RunDir::new(scratch.path().join("run")).unwrap();

    let command = WorkerCommand::new("sh").arg("-c").arg("sleep 30");

    let settings = PoolSettingsBuilder::new("overdue")
        .max_workers(2)
        .worker_timeout(Duration::from_secs(1))
        .build();

    let (tx, rx) = Supervisor::<RealWorkerSpawner>::channel();
    let spawner = RealWorkerSpawner::new(
        tx,
        command,
        Arc::new(WhichCache::new()),
        Restrictions::allow_all(),
        run_dir.clone(),
    )
    .with_worker_timeout(Some(Duration::from_secs(1)));

    let values = vec!["only".to_string()];
    let (supervisor, _stop) = Supervisor::new(settings, values, spawner, rx).unwrap();
    let supervisor = supervisor.with_run_dir(run_dir);

    let report = with_timeout(supervisor.start()).await.unwrap();

    assert_eq!(report.outcomes.len(), 1);
    match &report.outcomes["overdue-000"] {
        WorkerOutcome::Failed(ProcessError::Timeout { timeout_secs, .. }) => {
            assert_eq!(*timeout_secs, 1);
        }
        other => panic!("expected a timeout outcome, got {other:?}"),
    }
}

/// Crash recovery: a fresh supervisor, given only the run-file directory,
/// adopts a live worker left behind and reports its completion as
/// `Detached` (the exit status is unknowable across the restart).
#[tokio::test]
async fn adoption_recovers_workers_from_run_files() {
    init_tracing();

    let scratch = tempfile::tempdir().unwrap();
    let run_dir = RunDir::new(scratch.path().join("run")).unwrap();

    // A worker from the "previous" supervisor, still running.
    let cmdline = CommandLine::new("sh")
        .arg("-c")
        .unwrap()
        .arg("sleep 1")
        .unwrap();
    let mut orphan = ProcessHandle::new(cmdline, Arc::new(WhichCache::new()))
        .with_run_file(run_dir.run_file("adopt-000"));
    let pid = orphan.execute_background().await.unwrap();

    let settings = PoolSettingsBuilder::new("adopt").build();
    let (tx, rx) = Supervisor::<FakeWorkerSpawner>::channel();
    let spawner = FakeWorkerSpawner::new(tx);

    let (supervisor, _stop) = Supervisor::new(settings, Vec::new(), spawner, rx).unwrap();
    let mut supervisor = supervisor.with_run_dir(run_dir.clone());

    assert_eq!(supervisor.adopt_running().unwrap(), 1);
    assert_eq!(supervisor.current_worker_count(), 1);

    let report = with_timeout(supervisor.start()).await.unwrap();

    match &report.outcomes["adopt-000"] {
        WorkerOutcome::Detached { pid: reported } => assert_eq!(*reported, pid),
        other => panic!("expected Detached outcome, got {other:?}"),
    }
    assert!(run_dir.scan("adopt-").unwrap().is_empty());
}
