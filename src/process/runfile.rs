// src/process/runfile.rs

//! Run-files: on-disk PID records for live processes.
//!
//! One file per process/worker key is created at spawn and removed at
//! completion. The supervising side only ever reads these files, and each
//! worker writes only its own, so no locking is needed. Reads tolerate a
//! file that does not exist yet (race at spawn) or was just deleted (race
//! at completion) — both simply mean "not running".
//!
//! Run-files are a recovery mechanism across supervisor restarts; live
//! child handles remain the primary liveness source.

use std::fs;
use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::debug;

use crate::errors::Result;

/// The directory holding run-files, ensured to exist on construction.
#[derive(Debug, Clone)]
pub struct RunDir {
    dir: PathBuf,
}

impl RunDir {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Run-file for the given process/worker key.
    pub fn run_file(&self, key: &str) -> RunFile {
        RunFile {
            path: self.dir.join(format!("{}.pid", sanitize_key(key))),
        }
    }

    /// Scan for run-files whose key starts with `key_prefix`, returning
    /// `(key, pid)` pairs for every parseable record.
    ///
    /// Used to recover liveness state after a supervisor restart.
    pub fn scan(&self, key_prefix: &str) -> Result<Vec<(String, u32)>> {
        let prefix = sanitize_key(key_prefix);
        let mut found = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(key) = name.strip_suffix(".pid") else { continue };
            if !key.starts_with(&prefix) {
                continue;
            }
            let file = RunFile {
                path: entry.path(),
            };
            if let Some(pid) = file.read_pid() {
                found.push((key.to_string(), pid));
            }
        }

        Ok(found)
    }
}

/// A single PID record.
#[derive(Debug, Clone)]
pub struct RunFile {
    path: PathBuf,
}

impl RunFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn write_pid(&self, pid: u32) -> Result<()> {
        fs::write(&self.path, format!("{pid}\n"))?;
        debug!(run_file = %self.path.display(), pid, "run-file written");
        Ok(())
    }

    /// Read the recorded PID. `None` for a missing, empty or garbled file;
    /// both spawn and completion races land here and mean "not running".
    pub fn read_pid(&self) -> Option<u32> {
        let contents = fs::read_to_string(&self.path).ok()?;
        contents.trim().parse().ok()
    }

    /// Remove the record. Missing files are fine (completion race).
    pub fn remove(&self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!(run_file = %self.path.display(), error = %err, "failed to remove run-file");
            }
        }
    }
}

/// Whether the given PID refers to a live process (signal-0 probe).
pub fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Keys become file names; squash anything that is not filename-safe.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_key_squashes_separators() {
        assert_eq!(sanitize_key("sync/home dirs"), "sync_home_dirs");
        assert_eq!(sanitize_key("backup-7"), "backup-7");
    }

    #[test]
    fn read_pid_tolerates_missing_file() {
        let file = RunFile {
            path: PathBuf::from("/nonexistent/procpool/test.pid"),
        };
        assert_eq!(file.read_pid(), None);
        // Removing a missing file is a no-op, not an error.
        file.remove();
    }

    #[test]
    fn own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }
}
