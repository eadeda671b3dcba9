// src/restrict.rs

//! Filesystem path restrictions.
//!
//! A [`Restrictions`] value is an allow-list of path prefixes a process may
//! read from or write to. It is normalized once at construction; every
//! path-looking argument is checked before a process is spawned, and a
//! violation fails closed (no exec is attempted).

use std::path::{Component, Path, PathBuf};

use crate::errors::{ProcessError, Result};

/// Allow-list of filesystem path prefixes.
#[derive(Debug, Clone)]
pub struct Restrictions {
    allow_all: bool,
    read: Vec<PathBuf>,
    write: Vec<PathBuf>,
}

impl Restrictions {
    /// No restrictions: every path is allowed.
    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            read: Vec::new(),
            write: Vec::new(),
        }
    }

    /// Restrict to the given read and write prefix lists.
    ///
    /// Prefixes are normalized lexically (`.` and `..` components resolved)
    /// so that checks cannot be bypassed with traversal tricks.
    pub fn new<I, J, P, Q>(read: I, write: J) -> Self
    where
        I: IntoIterator<Item = P>,
        J: IntoIterator<Item = Q>,
        P: Into<PathBuf>,
        Q: Into<PathBuf>,
    {
        Self {
            allow_all: false,
            read: read.into_iter().map(|p| normalize(&p.into())).collect(),
            write: write.into_iter().map(|p| normalize(&p.into())).collect(),
        }
    }

    /// Restrict both reads and writes to the same prefixes.
    pub fn rooted_at<I, P>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let prefixes: Vec<PathBuf> =
            prefixes.into_iter().map(|p| normalize(&p.into())).collect();
        Self {
            allow_all: false,
            read: prefixes.clone(),
            write: prefixes,
        }
    }

    /// Check a path against the allow-list.
    ///
    /// Fails with [`ProcessError::RestrictionViolation`] if no allowed
    /// prefix covers the normalized path.
    pub fn check(&self, path: &Path, for_write: bool) -> Result<()> {
        if self.allow_all {
            return Ok(());
        }

        let normalized = normalize(path);
        let allowed = if for_write { &self.write } else { &self.read };

        if allowed.iter().any(|prefix| normalized.starts_with(prefix)) {
            Ok(())
        } else {
            Err(ProcessError::RestrictionViolation(normalized))
        }
    }
}

/// Whether an argument value should be treated as a filesystem path.
///
/// Only absolute values are checked; relative words are opaque to the core
/// (the caller controls the working directory separately).
pub fn looks_like_path(value: &str) -> bool {
    value.starts_with('/')
}

/// Lexical normalization: resolves `.` and `..` without touching the
/// filesystem, so unspawned processes cannot be probed for symlinks.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_accepts_everything() {
        let r = Restrictions::allow_all();
        assert!(r.check(Path::new("/etc/passwd"), true).is_ok());
    }

    #[test]
    fn prefix_check() {
        let r = Restrictions::rooted_at(["/tmp"]);
        assert!(r.check(Path::new("/tmp/scratch/a"), false).is_ok());
        assert!(r.check(Path::new("/etc/passwd"), false).is_err());
    }

    #[test]
    fn traversal_is_normalized_before_checking() {
        let r = Restrictions::rooted_at(["/tmp"]);
        assert!(r.check(Path::new("/tmp/../etc/passwd"), false).is_err());
        assert!(r.check(Path::new("/tmp/./x/../y"), false).is_ok());
    }

    #[test]
    fn read_and_write_lists_are_independent() {
        let r = Restrictions::new(["/data"], ["/data/out"]);
        assert!(r.check(Path::new("/data/in/file"), false).is_ok());
        assert!(r.check(Path::new("/data/in/file"), true).is_err());
        assert!(r.check(Path::new("/data/out/file"), true).is_ok());
    }
}
