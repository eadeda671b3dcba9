// src/pool/spawner.rs

//! Pluggable worker spawning.
//!
//! The supervisor talks to a [`WorkerSpawner`] instead of spawning
//! processes itself. This keeps the scheduling loop testable: tests swap
//! in a fake spawner that records work items and completes them on
//! command, while production uses [`RealWorkerSpawner`].
//!
//! Each real worker runs inside its own Tokio task that holds the child
//! handle and reports a typed [`WorkerEvent`] when the process reaches a
//! terminal state. Run-files written per worker key remain the recovery
//! mechanism across supervisor restarts.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cmdline::{CommandLine, WhichCache};
use crate::errors::Result;
use crate::pool::{WorkItem, WorkerOutcome};
use crate::process::{ProcessHandle, RunDir};
use crate::restrict::Restrictions;

/// Placeholder in worker arguments replaced by the item value.
const ITEM_PLACEHOLDER: &str = "{}";

/// Events flowing from worker tasks back to the supervisor.
#[derive(Debug)]
pub enum WorkerEvent {
    /// A worker reached a terminal state.
    Completed {
        key: String,
        outcome: WorkerOutcome,
    },
}

/// Trait abstracting how a work item becomes a running worker.
///
/// The implementation is free to:
/// - spawn OS processes (production)
/// - simulate workers and emit `WorkerEvent`s (tests)
pub trait WorkerSpawner: Send {
    /// Start a worker for the given item.
    ///
    /// Returns once the worker is launched; its terminal outcome arrives
    /// later as a [`WorkerEvent::Completed`] on the supervisor's channel.
    fn spawn_worker(
        &mut self,
        item: &WorkItem,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Command template each worker runs, parameterized by its work item.
///
/// Arguments containing `{}` get the item value substituted in place
/// (exempt from escaping concerns since substitution happens before the
/// argument is escaped as a whole); otherwise the value is appended as a
/// final argument.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub accepted_exit_codes: Vec<i32>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            accepted_exit_codes: vec![0],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn accept_exit_codes(mut self, codes: Vec<i32>) -> Self {
        self.accepted_exit_codes = codes;
        self
    }
}

/// Real worker spawner used in production.
///
/// Builds one [`ProcessHandle`] per item (run-file under the pool's run
/// directory, optional per-worker log file, the pool's timeout and
/// restrictions) and runs it in a background Tokio task that reports its
/// outcome over the event channel.
pub struct RealWorkerSpawner {
    events_tx: mpsc::Sender<WorkerEvent>,
    command: WorkerCommand,
    which: Arc<WhichCache>,
    restrictions: Restrictions,
    run_dir: RunDir,
    log_dir: Option<PathBuf>,
    worker_timeout: Option<Duration>,
}

impl RealWorkerSpawner {
    pub fn new(
        events_tx: mpsc::Sender<WorkerEvent>,
        command: WorkerCommand,
        which: Arc<WhichCache>,
        restrictions: Restrictions,
        run_dir: RunDir,
    ) -> Self {
        Self {
            events_tx,
            command,
            which,
            restrictions,
            run_dir,
            log_dir: None,
            worker_timeout: None,
        }
    }

    /// One append-only log file per worker key under this directory.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_worker_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.worker_timeout = timeout;
        self
    }

    fn build_handle(&self, item: &WorkItem) -> Result<ProcessHandle> {
        let mut cmdline = CommandLine::new(&self.command.program);

        let mut substituted = false;
        for arg in &self.command.args {
            if arg.contains(ITEM_PLACEHOLDER) {
                cmdline = cmdline.arg(arg.replace(ITEM_PLACEHOLDER, &item.value))?;
                substituted = true;
            } else {
                cmdline = cmdline.arg(arg)?;
            }
        }
        if !substituted {
            cmdline = cmdline.arg(&item.value)?;
        }

        for (name, value) in &self.command.env {
            cmdline = cmdline.env(name, value)?;
        }
        if let Some(dir) = &self.command.cwd {
            cmdline = cmdline.current_dir(dir)?;
        }

        let mut handle = ProcessHandle::new(cmdline, Arc::clone(&self.which))
            .with_restrictions(self.restrictions.clone())
            .accept_exit_codes(self.command.accepted_exit_codes.iter().copied())
            .with_timeout(self.worker_timeout)
            .with_run_file(self.run_dir.run_file(&item.key));

        if let Some(log_dir) = &self.log_dir {
            handle = handle.with_log_file(log_dir.join(format!("{}.log", item.key)));
        }

        Ok(handle)
    }
}

impl WorkerSpawner for RealWorkerSpawner {
    fn spawn_worker(
        &mut self,
        item: &WorkItem,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.events_tx.clone();
        let built = self.build_handle(item);
        let item = item.clone();

        Box::pin(async move {
            let mut handle = built?;

            info!(
                worker = %item.key,
                command = %handle.command_preview(),
                "starting worker process"
            );

            tokio::spawn(async move {
                let outcome = match handle.execute_no_return().await {
                    Ok(result) => WorkerOutcome::Completed(result),
                    Err(err) => WorkerOutcome::Failed(err),
                };

                if tx
                    .send(WorkerEvent::Completed {
                        key: item.key.clone(),
                        outcome,
                    })
                    .await
                    .is_err()
                {
                    debug!(worker = %item.key, "supervisor gone; dropping completion event");
                }
            });

            Ok(())
        })
    }
}
