// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `procpool`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "procpool",
    version,
    about = "Run external commands with restrictions, timeouts and bounded worker pools.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Procpool.toml` in the current working directory, if it
    /// exists; flags work without any config file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Execution strategy for single-command mode.
    #[arg(long, value_enum, default_value = "passthru")]
    pub mode: Mode,

    /// Wall-clock timeout in seconds (0 = unbounded).
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Accepted exit codes, comma separated (default: 0).
    #[arg(long, value_name = "CODES", value_delimiter = ',')]
    pub accept_codes: Vec<i32>,

    /// Run the command via sudo as root.
    #[arg(long)]
    pub sudo: bool,

    /// Run the command via sudo as this user.
    #[arg(long, value_name = "USER", conflicts_with = "sudo")]
    pub sudo_user: Option<String>,

    /// Allow read access under this path prefix (repeatable).
    ///
    /// Restriction flags replace any `[restrictions]` config section.
    #[arg(long = "allow", value_name = "PATH")]
    pub allow: Vec<PathBuf>,

    /// Allow write access under this path prefix (repeatable).
    #[arg(long = "allow-write", value_name = "PATH")]
    pub allow_write: Vec<PathBuf>,

    /// Work-items file enabling pool mode; `-` reads stdin. One item per
    /// line, blank lines skipped. Each item substitutes `{}` in the
    /// arguments, or is appended as a final argument.
    #[arg(long, value_name = "FILE")]
    pub items: Option<String>,

    /// Key naming this class of work (run-files, log files, report keys).
    #[arg(long, value_name = "NAME", default_value = "proc")]
    pub key: String,

    /// Minimum concurrent workers (pool mode).
    #[arg(long, value_name = "N")]
    pub min_workers: Option<usize>,

    /// Maximum concurrent workers (pool mode).
    #[arg(long, value_name = "N")]
    pub max_workers: Option<usize>,

    /// Liveness polling interval in milliseconds (pool mode).
    #[arg(long, value_name = "MS")]
    pub cycle_sleep_ms: Option<u64>,

    /// Back-off when no worker slot frees up, in milliseconds (pool mode).
    #[arg(long, value_name = "MS")]
    pub wait_sleep_ms: Option<u64>,

    /// Return once the work list is exhausted instead of waiting for the
    /// remaining workers to finish.
    #[arg(long)]
    pub no_wait: bool,

    /// KEY=VALUE environment variable for the command (repeatable).
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Working directory for the command.
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Use the command name literally instead of resolving it via PATH.
    #[arg(long)]
    pub no_which: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PROCPOOL_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Print the rendered command line(s), but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Command to run, followed by its arguments.
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        num_args = 1..
    )]
    pub command: Vec<String>,
}

/// Execution strategy as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Capture stdout and print it line by line on completion.
    Lines,
    /// Discard output; only the exit code matters.
    Quiet,
    /// Stream child output straight through.
    Passthru,
    /// Spawn detached and print the PID.
    Background,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
