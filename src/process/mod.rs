// src/process/mod.rs

//! Process execution layer.
//!
//! - [`handle`] owns [`ProcessHandle`], one spawned OS command and its
//!   lifecycle, plus the execution strategies layered on it.
//! - [`runfile`] manages PID records used for background liveness polling
//!   and cross-restart recovery.
//! - [`packages`] installs missing OS packages before retrying a command
//!   resolution once.

pub mod handle;
pub mod packages;
pub mod runfile;

pub use handle::{ProcessHandle, ProcessResult, SudoMode};
pub use packages::{OsFamily, PackageResolver, detect_os_family};
pub use runfile::{RunDir, RunFile, pid_alive};
