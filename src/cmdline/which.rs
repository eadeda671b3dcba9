// src/cmdline/which.rs

//! Executable resolution with an explicit, injectable cache.
//!
//! The cache is owned by whoever assembles the handles (typically one per
//! supervisor lifetime) and shared via `Arc`, instead of living in
//! process-wide static state. The package resolver invalidates entries
//! after installing a missing package so the retry sees a fresh lookup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::debug;

use crate::errors::{ProcessError, Result};

/// Cache of `name -> resolved executable path` lookups.
///
/// Only successful resolutions are cached; a miss is re-checked on every
/// call so that a package installed mid-run becomes visible.
#[derive(Debug, Default)]
pub struct WhichCache {
    inner: Mutex<HashMap<String, PathBuf>>,
}

impl WhichCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name` to an absolute executable path.
    ///
    /// Absolute and relative paths containing a separator are returned
    /// as-is if they exist and skip the `PATH` search.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        {
            let cache = self.lock();
            if let Some(path) = cache.get(name) {
                return Ok(path.clone());
            }
        }

        let resolved = which::which(name)
            .map_err(|_| ProcessError::CommandNotFound(name.to_string()))?;

        debug!(command = %name, path = %resolved.display(), "resolved executable");

        self.lock().insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Drop a cached resolution (used after package installation).
    pub fn invalidate(&self, name: &str) {
        self.lock().remove(name);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PathBuf>> {
        // A poisoned cache still holds valid path data.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
