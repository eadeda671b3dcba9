// src/pool/mod.rs

//! Worker-pool supervision.
//!
//! A pool distributes a list of opaque work items across a bounded set of
//! concurrently running background workers, each a [`crate::process::ProcessHandle`]
//! parameterized by one item.
//!
//! Workers are spawned in submission order, but completion order across
//! items is unspecified; callers must not assume FIFO completion.
//!
//! - [`spawner`] defines the [`WorkerSpawner`] seam the supervisor talks
//!   to, and the production implementation that spawns real processes.
//! - [`supervisor`] owns the scheduling loop and the pool state machine.

pub mod spawner;
pub mod supervisor;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{ProcessError, Result};
use crate::process::ProcessResult;

pub use spawner::{RealWorkerSpawner, WorkerCommand, WorkerEvent, WorkerSpawner};
pub use supervisor::{StopHandle, Supervisor};

/// One unit of work: a stable key (used for run-file and log naming) and
/// the opaque value handed to the worker command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub key: String,
    pub value: String,
}

/// Bounds and cadence for a worker pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Identifies the class of work; prefixes run-file and log names.
    pub key: String,
    /// Floor of concurrently running workers while enough items remain.
    /// Fewer items than `min_workers` spawn only as many workers as items.
    pub min_workers: usize,
    pub max_workers: usize,
    /// Back-off when a full cycle freed no worker slot.
    pub wait_sleep: Duration,
    /// Polling interval between liveness checks.
    pub cycle_sleep: Duration,
    /// Whether `start()` blocks until every worker completed.
    pub wait_for_finish: bool,
    /// Wall-clock bound per worker, enforced by the supervisor side.
    pub worker_timeout: Option<Duration>,
}

impl PoolSettings {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            min_workers: 1,
            max_workers: 4,
            wait_sleep: Duration::from_millis(1000),
            cycle_sleep: Duration::from_millis(200),
            wait_for_finish: true,
            worker_timeout: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.is_empty() {
            return Err(ProcessError::ConfigError(
                "pool key must not be empty".to_string(),
            ));
        }
        if self.max_workers == 0 {
            return Err(ProcessError::ConfigError(
                "max_workers must be >= 1 (got 0)".to_string(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(ProcessError::ConfigError(format!(
                "min_workers ({}) must not exceed max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.cycle_sleep.is_zero() {
            return Err(ProcessError::ConfigError(
                "cycle_sleep must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pool lifecycle.
///
/// `Running` spawns workers up to `max_workers` while items remain;
/// `Draining` (after `stop()`) lets live workers finish without spawning
/// new ones; `Stopped` is terminal with no live workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolState::Idle => "idle",
            PoolState::Running => "running",
            PoolState::Draining => "draining",
            PoolState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

impl FromStr for PoolState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "idle" => Ok(PoolState::Idle),
            "running" => Ok(PoolState::Running),
            "draining" => Ok(PoolState::Draining),
            "stopped" => Ok(PoolState::Stopped),
            other => Err(format!("invalid pool state: {other}")),
        }
    }
}

/// Terminal outcome of one worker.
#[derive(Debug)]
pub enum WorkerOutcome {
    /// Worker process exited with an accepted code.
    Completed(ProcessResult),
    /// Worker process failed (non-accepted exit, timeout, spawn error...).
    Failed(ProcessError),
    /// Worker was only tracked by PID (adopted from a run-file after a
    /// supervisor restart) and exited; its status is unknowable.
    Detached { pid: u32 },
}

impl WorkerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerOutcome::Completed(_))
    }
}

/// Per-item results of a pool run.
///
/// A failed worker never halts the pool; overall success is the caller's
/// judgement over this report.
#[derive(Debug, Default)]
pub struct PoolReport {
    /// Outcome per worker key, for every worker that reached a terminal
    /// state before `start()` returned.
    pub outcomes: BTreeMap<String, WorkerOutcome>,
    /// Workers still running when `start()` returned (`wait_for_finish =
    /// false`).
    pub still_running: Vec<String>,
    /// Items never spawned because the pool was stopped first.
    pub skipped: Vec<String>,
}

impl PoolReport {
    pub fn all_succeeded(&self) -> bool {
        self.still_running.is_empty()
            && self.skipped.is_empty()
            && self.outcomes.values().all(WorkerOutcome::is_success)
    }

    pub fn failed_keys(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.is_success())
            .map(|(key, _)| key.as_str())
            .collect()
    }
}
