// src/pool/supervisor.rs

//! The worker-pool supervisor loop.
//!
//! Single-threaded cooperative scheduling: the loop spawns workers up to
//! `max_workers` while items remain, sleeps `cycle_sleep` between liveness
//! polls, and backs off an extra `wait_sleep` when a full cycle freed no
//! slot. `stop()` is observed at the next polling tick (a documented
//! latency bound, not a bug).
//!
//! Workers report completion over an mpsc channel from their own Tokio
//! tasks; run-file PIDs are the fallback for workers adopted after a
//! supervisor restart and for the wall-clock reaper.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{ProcessError, Result};
use crate::pool::{
    PoolReport, PoolSettings, PoolState, WorkItem, WorkerEvent, WorkerOutcome, WorkerSpawner,
};
use crate::process::runfile::{RunDir, pid_alive};

/// Extra slack the reaper grants past the worker timeout before SIGKILL.
const REAP_GRACE: Duration = Duration::from_secs(2);

/// Capacity of the worker event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Cooperative stop control for a running pool.
///
/// `stop()` drains: no new workers are spawned, live ones finish.
/// `stop_force()` additionally SIGTERMs every live worker.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    force: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop_force(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.force.store(true, Ordering::Relaxed);
    }
}

/// Book-keeping for one live worker.
#[derive(Debug)]
struct LiveWorker {
    started_at: Instant,
    /// Set for workers re-tracked from a run-file after a restart; such
    /// workers are polled by PID instead of the event channel.
    adopted_pid: Option<u32>,
    term_sent: bool,
}

impl LiveWorker {
    fn started() -> Self {
        Self {
            started_at: Instant::now(),
            adopted_pid: None,
            term_sent: false,
        }
    }
}

/// Manages a bounded set of concurrently running workers over a keyed
/// work list.
pub struct Supervisor<S: WorkerSpawner> {
    settings: PoolSettings,
    spawner: S,
    events_rx: mpsc::Receiver<WorkerEvent>,
    queue: VecDeque<WorkItem>,
    live: HashMap<String, LiveWorker>,
    outcomes: BTreeMap<String, WorkerOutcome>,
    state: PoolState,
    run_dir: Option<RunDir>,
    stop: Arc<AtomicBool>,
    force: Arc<AtomicBool>,
}

impl<S: WorkerSpawner> Supervisor<S> {
    /// Event channel connecting worker tasks to the supervisor; hand the
    /// sender to the spawner and the receiver to [`Supervisor::new`].
    pub fn channel() -> (mpsc::Sender<WorkerEvent>, mpsc::Receiver<WorkerEvent>) {
        mpsc::channel(EVENT_CHANNEL_CAPACITY)
    }

    /// Build a supervisor over the given work values.
    ///
    /// Values are keyed `<pool key>-<index>` in submission order; keys
    /// name run-files and log files and identify results in the report.
    pub fn new(
        settings: PoolSettings,
        values: Vec<String>,
        spawner: S,
        events_rx: mpsc::Receiver<WorkerEvent>,
    ) -> Result<(Self, StopHandle)> {
        settings.validate()?;

        let queue = values
            .into_iter()
            .enumerate()
            .map(|(idx, value)| WorkItem {
                key: format!("{}-{idx:03}", settings.key),
                value,
            })
            .collect();

        let stop = Arc::new(AtomicBool::new(false));
        let force = Arc::new(AtomicBool::new(false));
        let handle = StopHandle {
            stop: Arc::clone(&stop),
            force: Arc::clone(&force),
        };

        Ok((
            Self {
                settings,
                spawner,
                events_rx,
                queue,
                live: HashMap::new(),
                outcomes: BTreeMap::new(),
                state: PoolState::Idle,
                run_dir: None,
                stop,
                force,
            },
            handle,
        ))
    }

    /// Run directory used for adoption and the wall-clock reaper.
    pub fn with_run_dir(mut self, run_dir: RunDir) -> Self {
        self.run_dir = Some(run_dir);
        self
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Live workers right now; never exceeds `max_workers` for workers
    /// this supervisor spawned.
    pub fn current_worker_count(&self) -> usize {
        self.live.len()
    }

    /// Re-track workers recorded in the run directory under this pool's
    /// key. Live PIDs become adopted workers; stale records are removed.
    ///
    /// This is the crash-recovery path: the run-file directory alone is
    /// enough to pick up liveness state from a previous supervisor.
    pub fn adopt_running(&mut self) -> Result<usize> {
        let Some(run_dir) = &self.run_dir else {
            return Err(ProcessError::InvalidArgument(
                "adopting workers requires a run directory".to_string(),
            ));
        };

        let prefix = format!("{}-", self.settings.key);
        let mut adopted = 0;

        for (key, pid) in run_dir.scan(&prefix)? {
            if self.live.contains_key(&key) {
                continue;
            }
            if pid_alive(pid) {
                info!(worker = %key, pid, "adopting live worker from run-file");
                self.live.insert(
                    key,
                    LiveWorker {
                        started_at: Instant::now(),
                        adopted_pid: Some(pid),
                        term_sent: false,
                    },
                );
                adopted += 1;
            } else {
                debug!(worker = %key, pid, "removing stale run-file");
                run_dir.run_file(&key).remove();
            }
        }

        Ok(adopted)
    }

    /// Run the supervisor loop until the work list is exhausted.
    ///
    /// With `wait_for_finish` the call blocks until every worker reached a
    /// terminal state; otherwise it returns once nothing is left to spawn,
    /// leaving live workers to finish asynchronously (reported as
    /// `still_running`).
    pub async fn start(mut self) -> Result<PoolReport> {
        self.state = PoolState::Running;
        info!(
            pool = %self.settings.key,
            items = self.queue.len(),
            min_workers = self.settings.min_workers,
            max_workers = self.settings.max_workers,
            "worker pool starting"
        );

        let mut force_handled = false;

        loop {
            self.observe_stop(&mut force_handled);

            if self.state == PoolState::Running {
                self.spawn_up_to_max().await;
            }

            let spawnable_left = self.state == PoolState::Running && !self.queue.is_empty();
            if self.live.is_empty() && !spawnable_left {
                break;
            }
            if !self.settings.wait_for_finish && !spawnable_left && self.state == PoolState::Running
            {
                break;
            }

            tokio::time::sleep(self.settings.cycle_sleep).await;
            let freed = self.poll_workers();

            if !freed && self.live.len() >= self.settings.max_workers {
                debug!(
                    pool = %self.settings.key,
                    live = self.live.len(),
                    "no worker slot freed this cycle; backing off"
                );
                tokio::time::sleep(self.settings.wait_sleep).await;
                self.poll_workers();
            }
        }

        // Pick up completions already sitting in the channel.
        self.poll_workers();

        let still_running: Vec<String> = self.live.keys().cloned().collect();
        let skipped: Vec<String> = self.queue.iter().map(|item| item.key.clone()).collect();

        if still_running.is_empty() {
            self.state = PoolState::Stopped;
        }

        info!(
            pool = %self.settings.key,
            completed = self.outcomes.len(),
            still_running = still_running.len(),
            skipped = skipped.len(),
            state = %self.state,
            "worker pool finished"
        );

        Ok(PoolReport {
            outcomes: self.outcomes,
            still_running,
            skipped,
        })
    }

    fn observe_stop(&mut self, force_handled: &mut bool) {
        if self.stop.load(Ordering::Relaxed) && self.state == PoolState::Running {
            info!(pool = %self.settings.key, "stop requested; draining pool");
            self.state = PoolState::Draining;
        }

        if self.force.load(Ordering::Relaxed) && !*force_handled {
            *force_handled = true;
            warn!(
                pool = %self.settings.key,
                live = self.live.len(),
                "force stop; signalling live workers"
            );
            for (key, worker) in &self.live {
                if let Some(pid) = self.worker_pid(key, worker) {
                    signal_pid(pid, Signal::SIGTERM);
                }
            }
        }
    }

    async fn spawn_up_to_max(&mut self) {
        while self.live.len() < self.settings.max_workers {
            let Some(item) = self.queue.pop_front() else {
                break;
            };

            debug!(
                worker = %item.key,
                slot = self.live.len() + 1,
                "spawning worker"
            );

            match self.spawner.spawn_worker(&item).await {
                Ok(()) => {
                    self.live.insert(item.key, LiveWorker::started());
                }
                Err(err) => {
                    // A worker that fails to spawn never halts the pool.
                    warn!(worker = %item.key, error = %err, "failed to spawn worker");
                    self.outcomes.insert(item.key, WorkerOutcome::Failed(err));
                }
            }
        }
    }

    /// One liveness pass: drain completion events, poll adopted PIDs,
    /// reap overdue workers. Returns whether any slot was freed.
    fn poll_workers(&mut self) -> bool {
        let mut freed = false;

        while let Ok(event) = self.events_rx.try_recv() {
            let WorkerEvent::Completed { key, outcome } = event;
            if self.live.remove(&key).is_some() {
                freed = true;
            }
            match &outcome {
                WorkerOutcome::Completed(result) => {
                    info!(worker = %key, exit_code = result.exit_code, "worker completed");
                }
                WorkerOutcome::Failed(err) => {
                    warn!(worker = %key, error = %err, "worker failed");
                }
                WorkerOutcome::Detached { pid } => {
                    info!(worker = %key, pid, "detached worker exited");
                }
            }
            self.outcomes.insert(key, outcome);
        }

        let dead_adopted: Vec<(String, u32)> = self
            .live
            .iter()
            .filter_map(|(key, worker)| {
                worker
                    .adopted_pid
                    .filter(|pid| !pid_alive(*pid))
                    .map(|pid| (key.clone(), pid))
            })
            .collect();

        for (key, pid) in dead_adopted {
            self.live.remove(&key);
            if let Some(run_dir) = &self.run_dir {
                run_dir.run_file(&key).remove();
            }
            info!(worker = %key, pid, "adopted worker exited");
            self.outcomes.insert(key, WorkerOutcome::Detached { pid });
            freed = true;
        }

        self.reap_overdue();
        freed
    }

    /// Wall-clock backstop: a detached worker cannot own its own deadline,
    /// so the supervisor checks elapsed time and escalates SIGTERM to
    /// SIGKILL past the grace window.
    fn reap_overdue(&mut self) {
        let Some(timeout) = self.settings.worker_timeout else {
            return;
        };

        let run_dir = self.run_dir.clone();
        for (key, worker) in self.live.iter_mut() {
            let elapsed = worker.started_at.elapsed();
            if elapsed <= timeout {
                continue;
            }

            let pid = worker.adopted_pid.or_else(|| {
                run_dir
                    .as_ref()
                    .and_then(|dir| dir.run_file(key).read_pid())
            });
            let Some(pid) = pid else { continue };

            if !worker.term_sent {
                warn!(
                    worker = %key,
                    pid,
                    elapsed_secs = elapsed.as_secs(),
                    "worker exceeded timeout; sending SIGTERM"
                );
                signal_pid(pid, Signal::SIGTERM);
                worker.term_sent = true;
            } else if elapsed > timeout + REAP_GRACE {
                warn!(worker = %key, pid, "worker ignored SIGTERM; sending SIGKILL");
                signal_pid(pid, Signal::SIGKILL);
            }
        }
    }

    fn worker_pid(&self, key: &str, worker: &LiveWorker) -> Option<u32> {
        worker.adopted_pid.or_else(|| {
            self.run_dir
                .as_ref()
                .and_then(|dir| dir.run_file(key).read_pid())
        })
    }
}

/// Signal a PID; a process that already exited is not an error.
fn signal_pid(pid: u32, signal: Signal) {
    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => {
            warn!(pid, signal = ?signal, error = %err, "failed to signal worker");
        }
    }
}
