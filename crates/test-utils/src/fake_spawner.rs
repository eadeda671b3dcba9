use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use procpool::errors::{ProcessError, Result};
use procpool::pool::{WorkItem, WorkerEvent, WorkerOutcome, WorkerSpawner};
use procpool::process::ProcessResult;

/// A fake spawner that:
/// - records which work items were "spawned" and in what order
/// - tracks the number of simultaneously live fake workers and its
///   high-water mark (for asserting pool bounds)
/// - completes each worker after `work_duration`, reporting success unless
///   the item value contains `fail_marker`.
pub struct FakeWorkerSpawner {
    events_tx: mpsc::Sender<WorkerEvent>,
    spawned: Arc<Mutex<Vec<String>>>,
    live: Arc<AtomicUsize>,
    high_water: Arc<AtomicUsize>,
    work_duration: Duration,
    fail_marker: Option<String>,
}

impl FakeWorkerSpawner {
    pub fn new(events_tx: mpsc::Sender<WorkerEvent>) -> Self {
        Self {
            events_tx,
            spawned: Arc::new(Mutex::new(Vec::new())),
            live: Arc::new(AtomicUsize::new(0)),
            high_water: Arc::new(AtomicUsize::new(0)),
            work_duration: Duration::from_millis(50),
            fail_marker: None,
        }
    }

    /// How long each fake worker "runs" before completing.
    pub fn with_work_duration(mut self, duration: Duration) -> Self {
        self.work_duration = duration;
        self
    }

    /// Items whose value contains this marker report a failed outcome.
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    /// Handle for inspecting recorded state after the pool ran.
    pub fn probe(&self) -> SpawnProbe {
        SpawnProbe {
            spawned: Arc::clone(&self.spawned),
            live: Arc::clone(&self.live),
            high_water: Arc::clone(&self.high_water),
        }
    }
}

/// Shared view into a [`FakeWorkerSpawner`]'s recorded state.
#[derive(Clone)]
pub struct SpawnProbe {
    spawned: Arc<Mutex<Vec<String>>>,
    live: Arc<AtomicUsize>,
    high_water: Arc<AtomicUsize>,
}

impl SpawnProbe {
    pub fn spawned_keys(&self) -> Vec<String> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    pub fn live_now(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live fake workers observed.
    pub fn high_water_mark(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

impl WorkerSpawner for FakeWorkerSpawner {
    fn spawn_worker(
        &mut self,
        item: &WorkItem,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.events_tx.clone();
        let spawned = Arc::clone(&self.spawned);
        let live = Arc::clone(&self.live);
        let high_water = Arc::clone(&self.high_water);
        let work_duration = self.work_duration;
        let fail = self
            .fail_marker
            .as_ref()
            .is_some_and(|marker| item.value.contains(marker));
        let item = item.clone();

        Box::pin(async move {
            {
                let mut guard = spawned.lock().unwrap();
                guard.push(item.key.clone());
            }
            let now_live = live.fetch_add(1, Ordering::SeqCst) + 1;
            high_water.fetch_max(now_live, Ordering::SeqCst);

            tokio::spawn(async move {
                tokio::time::sleep(work_duration).await;
                live.fetch_sub(1, Ordering::SeqCst);

                let outcome = if fail {
                    WorkerOutcome::Failed(ProcessError::ProcessFailed {
                        command: format!("fake worker {}", item.key),
                        exit_code: 1,
                        output_tail: vec!["simulated failure".to_string()],
                    })
                } else {
                    WorkerOutcome::Completed(ProcessResult {
                        pid: None,
                        exit_code: 0,
                        output_lines: Vec::new(),
                        duration: work_duration,
                    })
                };

                let _ = tx
                    .send(WorkerEvent::Completed {
                        key: item.key.clone(),
                        outcome,
                    })
                    .await;
            });

            Ok(())
        })
    }
}
