// src/errors.rs

//! Crate-wide error taxonomy and helpers.
//!
//! Every failure a process execution can produce is a typed variant here;
//! callers are expected to match on variants (and on the captured output
//! tail) instead of parsing error strings.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("process exited with non-accepted code {exit_code}: {command}")]
    ProcessFailed {
        command: String,
        exit_code: i32,
        /// Last lines of combined stderr + stdout, for caller-side
        /// pattern matching without re-running the command.
        output_tail: Vec<String>,
    },

    #[error("process exceeded timeout of {timeout_secs}s: {command}")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("sudo requested but not available for the invoking user")]
    NoSudo,

    #[error("path not allowed by restrictions: {0}")]
    RestrictionViolation(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProcessError {
    /// Check whether a `ProcessFailed` output tail contains the given
    /// substring.
    ///
    /// This is the translation hook for callers that map known failure
    /// strings (e.g. "no such file or directory") onto domain errors.
    /// Returns `false` for every other variant.
    pub fn output_contains(&self, needle: &str) -> bool {
        match self {
            ProcessError::ProcessFailed { output_tail, .. } => {
                output_tail.iter().any(|line| line.contains(needle))
            }
            _ => false,
        }
    }

    /// Exit code carried by this error, if any.
    ///
    /// Used by the CLI to surface the child's own exit code; timeouts map
    /// to 124 by convention.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessError::ProcessFailed { exit_code, .. } => Some(*exit_code),
            ProcessError::Timeout { .. } => Some(124),
            _ => None,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ProcessError>;
