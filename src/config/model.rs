// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Top-level configuration as read from a `Procpool.toml` file.
///
/// ```toml
/// [paths]
/// root = "/srv/procpool"
///
/// [restrictions]
/// read = ["/srv/data", "/tmp"]
/// write = ["/srv/data/out", "/tmp"]
///
/// [pool]
/// min_workers = 2
/// max_workers = 8
/// cycle_sleep_ms = 200
/// wait_sleep_ms = 1000
///
/// [defaults]
/// timeout_secs = 0
/// accepted_exit_codes = [0]
///
/// [packages.debian]
/// rsync = ["rsync"]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub paths: PathsSection,

    #[serde(default)]
    pub restrictions: RestrictionsSection,

    #[serde(default)]
    pub pool: PoolSection,

    #[serde(default)]
    pub defaults: DefaultsSection,

    /// `[packages.<os-family>]`: per-command package lists installed when
    /// the command cannot be resolved on that family.
    #[serde(default)]
    pub packages: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

/// `[paths]` section.
///
/// `root` defaults to `$PROCPOOL_ROOT`, or the current directory. The
/// run and log directories default to `<root>/run` and `<root>/log`; when
/// `$ENVIRONMENT` is set they become `<root>/<environment>/run` etc. so
/// deployment stages do not share PID records.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PathsSection {
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default)]
    pub run_dir: Option<PathBuf>,

    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// `[restrictions]` section: allowed path prefixes. Empty lists mean
/// unrestricted (restrictions are opt-in configuration).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RestrictionsSection {
    #[serde(default)]
    pub read: Vec<PathBuf>,

    #[serde(default)]
    pub write: Vec<PathBuf>,
}

/// `[pool]` section: default worker-pool bounds and cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSection {
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_cycle_sleep_ms")]
    pub cycle_sleep_ms: u64,

    #[serde(default = "default_wait_sleep_ms")]
    pub wait_sleep_ms: u64,

    #[serde(default = "default_wait_for_finish")]
    pub wait_for_finish: bool,
}

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    4
}

fn default_cycle_sleep_ms() -> u64 {
    200
}

fn default_wait_sleep_ms() -> u64 {
    1000
}

fn default_wait_for_finish() -> bool {
    true
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            cycle_sleep_ms: default_cycle_sleep_ms(),
            wait_sleep_ms: default_wait_sleep_ms(),
            wait_for_finish: default_wait_for_finish(),
        }
    }
}

/// `[defaults]` section: per-process execution defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsSection {
    /// Wall-clock timeout; 0 means unbounded.
    #[serde(default)]
    pub timeout_secs: u64,

    #[serde(default = "default_accepted_exit_codes")]
    pub accepted_exit_codes: Vec<i32>,
}

fn default_accepted_exit_codes() -> Vec<i32> {
    vec![0]
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            timeout_secs: 0,
            accepted_exit_codes: default_accepted_exit_codes(),
        }
    }
}

/// Validated configuration, produced via `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub paths: PathsSection,
    pub restrictions: RestrictionsSection,
    pub pool: PoolSection,
    pub defaults: DefaultsSection,
    pub packages: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            paths: raw.paths,
            restrictions: raw.restrictions,
            pool: raw.pool,
            defaults: raw.defaults,
            packages: raw.packages,
        }
    }
}
