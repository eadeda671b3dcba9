// src/cmdline/mod.rs

//! Command line assembly.
//!
//! - [`builder`] holds [`CommandLine`], the ordered-argument builder with
//!   per-argument escape control, redirections and pipes.
//! - [`escape`] implements POSIX single-quote escaping.
//! - [`which`] resolves program names through an explicit, injectable cache.

pub mod builder;
pub mod escape;
pub mod which;

pub use builder::{CommandLine, OutputChannel};
pub use which::WhichCache;
