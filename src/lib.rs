// src/lib.rs

pub mod cli;
pub mod cmdline;
pub mod config;
pub mod errors;
pub mod logging;
pub mod pool;
pub mod process;
pub mod restrict;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Mode};
use crate::cmdline::{CommandLine, WhichCache};
use crate::config::{ConfigFile, load_and_validate};
use crate::errors::{ProcessError, Result};
use crate::pool::{PoolSettings, RealWorkerSpawner, Supervisor, WorkerCommand, WorkerOutcome};
use crate::process::{OsFamily, ProcessHandle, RunDir, SudoMode};
use crate::restrict::Restrictions;

/// High-level entry point used by `main.rs`. Returns the process exit
/// code.
///
/// This wires together:
/// - config loading
/// - restrictions and run/log directories
/// - a single handle (strategy chosen by `--mode`) or a worker pool
/// - Ctrl-C handling for pool mode
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_config(&args)?;
    let which = Arc::new(WhichCache::new());
    let restrictions = build_restrictions(&args, &cfg);

    if args.dry_run {
        return print_dry_run(&args);
    }

    match &args.items {
        Some(source) => run_pool(&args, &cfg, which, restrictions, source).await,
        None => run_single(&args, &cfg, which, restrictions).await,
    }
}

fn load_config(args: &CliArgs) -> Result<ConfigFile> {
    match &args.config {
        Some(path) => load_and_validate(path),
        None => {
            let default = config::default_config_path();
            if default.exists() {
                load_and_validate(&default)
            } else {
                Ok(config::default_config())
            }
        }
    }
}

/// CLI restriction flags replace the config section entirely; with
/// neither present, everything is allowed.
fn build_restrictions(args: &CliArgs, cfg: &ConfigFile) -> Restrictions {
    if !args.allow.is_empty() || !args.allow_write.is_empty() {
        // Write prefixes are implicitly readable.
        let read: Vec<_> = args
            .allow
            .iter()
            .chain(args.allow_write.iter())
            .cloned()
            .collect();
        return Restrictions::new(read, args.allow_write.clone());
    }

    if !cfg.restrictions.read.is_empty() || !cfg.restrictions.write.is_empty() {
        return Restrictions::new(cfg.restrictions.read.clone(), cfg.restrictions.write.clone());
    }

    Restrictions::allow_all()
}

fn sudo_mode(args: &CliArgs) -> SudoMode {
    if args.sudo {
        SudoMode::Root
    } else if let Some(user) = &args.sudo_user {
        SudoMode::User(user.clone())
    } else {
        SudoMode::None
    }
}

fn timeout_secs(args: &CliArgs, cfg: &ConfigFile) -> u64 {
    args.timeout.unwrap_or(cfg.defaults.timeout_secs)
}

fn accepted_codes(args: &CliArgs, cfg: &ConfigFile) -> Vec<i32> {
    if args.accept_codes.is_empty() {
        cfg.defaults.accepted_exit_codes.clone()
    } else {
        args.accept_codes.clone()
    }
}

fn parse_env_pair(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(ProcessError::InvalidArgument(format!(
            "--env expects KEY=VALUE (got {pair:?})"
        ))),
    }
}

fn build_cmdline(args: &CliArgs) -> Result<CommandLine> {
    let program = &args.command[0];
    let mut cmdline = if args.no_which {
        CommandLine::literal(program)
    } else {
        CommandLine::new(program)
    };

    cmdline = cmdline.args(args.command[1..].iter().cloned())?;

    for pair in &args.env {
        let (name, value) = parse_env_pair(pair)?;
        cmdline = cmdline.env(name, value)?;
    }
    if let Some(dir) = &args.cwd {
        cmdline = cmdline.current_dir(dir)?;
    }

    Ok(cmdline)
}

/// Register `[packages.<family>]` lists from the config for the program
/// being run, so a missing command triggers one install-and-retry.
fn register_config_packages(
    mut handle: ProcessHandle,
    cfg: &ConfigFile,
    program: &str,
) -> ProcessHandle {
    for (family, commands) in &cfg.packages {
        let Ok(family) = family.parse::<OsFamily>() else {
            continue; // validated at load time
        };
        if let Some(packages) = commands.get(program) {
            handle = handle.register_packages(family, packages.clone());
        }
    }
    handle
}

async fn run_single(
    args: &CliArgs,
    cfg: &ConfigFile,
    which: Arc<WhichCache>,
    restrictions: Restrictions,
) -> Result<i32> {
    let program = args.command[0].clone();
    let cmdline = build_cmdline(args)?;

    let mut handle = ProcessHandle::new(cmdline, which)
        .with_restrictions(restrictions)
        .with_timeout_secs(timeout_secs(args, cfg))
        .accept_exit_codes(accepted_codes(args, cfg))
        .with_sudo(sudo_mode(args));
    handle = register_config_packages(handle, cfg, &program);

    match args.mode {
        Mode::Lines => {
            let lines = handle.execute_return_lines().await?;
            for line in &lines {
                println!("{line}");
            }
            Ok(0)
        }
        Mode::Quiet => {
            let result = handle.execute_no_return().await?;
            debug!(exit_code = result.exit_code, "command finished");
            Ok(0)
        }
        Mode::Passthru => {
            let accepted = handle.execute_passthru().await?;
            if accepted {
                Ok(0)
            } else {
                Ok(handle.last_exit_code().unwrap_or(1))
            }
        }
        Mode::Background => {
            let run_dir = RunDir::new(config::run_dir_path(cfg))?;
            let log_dir = config::log_dir_path(cfg);
            std::fs::create_dir_all(&log_dir)?;

            let mut handle = handle
                .with_run_file(run_dir.run_file(&args.key))
                .with_log_file(log_dir.join(format!("{}.log", args.key)));

            let pid = handle.execute_background().await?;
            println!("{pid}");
            Ok(0)
        }
    }
}

async fn run_pool(
    args: &CliArgs,
    cfg: &ConfigFile,
    which: Arc<WhichCache>,
    restrictions: Restrictions,
    items_source: &str,
) -> Result<i32> {
    let items = read_items(items_source)?;
    if items.is_empty() {
        warn!("work-item list is empty; nothing to do");
        return Ok(0);
    }

    let mut settings = PoolSettings::new(&args.key);
    settings.min_workers = args.min_workers.unwrap_or(cfg.pool.min_workers);
    settings.max_workers = args.max_workers.unwrap_or(cfg.pool.max_workers);
    settings.cycle_sleep =
        Duration::from_millis(args.cycle_sleep_ms.unwrap_or(cfg.pool.cycle_sleep_ms));
    settings.wait_sleep =
        Duration::from_millis(args.wait_sleep_ms.unwrap_or(cfg.pool.wait_sleep_ms));
    settings.wait_for_finish = if args.no_wait {
        false
    } else {
        cfg.pool.wait_for_finish
    };
    let timeout = timeout_secs(args, cfg);
    settings.worker_timeout = (timeout > 0).then(|| Duration::from_secs(timeout));

    let run_dir = RunDir::new(config::run_dir_path(cfg))?;
    let log_dir = config::log_dir_path(cfg);
    std::fs::create_dir_all(&log_dir)?;

    let mut command = WorkerCommand::new(&args.command[0])
        .args(args.command[1..].iter().cloned())
        .accept_exit_codes(accepted_codes(args, cfg));
    for pair in &args.env {
        let (name, value) = parse_env_pair(pair)?;
        command = command.env(name, value);
    }
    if let Some(dir) = &args.cwd {
        command = command.current_dir(dir);
    }

    let (events_tx, events_rx) = Supervisor::<RealWorkerSpawner>::channel();
    let spawner = RealWorkerSpawner::new(
        events_tx,
        command,
        which,
        restrictions,
        run_dir.clone(),
    )
    .with_log_dir(&log_dir)
    .with_worker_timeout(settings.worker_timeout);

    let (supervisor, stop_handle) = Supervisor::new(settings, items, spawner, events_rx)?;
    let supervisor = supervisor.with_run_dir(run_dir);

    // Ctrl-C → cooperative drain; a second Ctrl-C force-kills workers.
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            return;
        }
        info!("interrupt received; draining worker pool");
        stop_handle.stop();
        if signal::ctrl_c().await.is_ok() {
            warn!("second interrupt; force-stopping workers");
            stop_handle.stop_force();
        }
    });

    let report = supervisor.start().await?;

    for (key, outcome) in &report.outcomes {
        match outcome {
            WorkerOutcome::Completed(result) => {
                println!("{key}: ok (exit {})", result.exit_code);
            }
            WorkerOutcome::Failed(err) => {
                println!("{key}: failed ({err})");
            }
            WorkerOutcome::Detached { pid } => {
                println!("{key}: finished detached (pid {pid})");
            }
        }
    }
    for key in &report.still_running {
        println!("{key}: still running");
    }
    for key in &report.skipped {
        println!("{key}: skipped");
    }

    Ok(if report.all_succeeded() { 0 } else { 1 })
}

fn read_items(source: &str) -> Result<Vec<String>> {
    let contents = if source == "-" {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(Path::new(source))?
    };

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Simple dry-run output: print the rendered command line(s) without
/// executing anything.
fn print_dry_run(args: &CliArgs) -> Result<i32> {
    println!("procpool dry-run");

    match &args.items {
        Some(source) => {
            let items = read_items(source)?;
            println!("  pool key: {}", args.key);
            println!("  items ({}):", items.len());
            for (idx, value) in items.iter().enumerate() {
                let mut cmdline = worker_preview_cmdline(args, value)?;
                println!("    {idx:03}: {}", cmdline.render(false)?);
            }
        }
        None => {
            let mut cmdline = build_cmdline(args)?;
            let background = args.mode == Mode::Background;
            println!("  command: {}", cmdline.render(background)?);
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(0)
}

fn worker_preview_cmdline(args: &CliArgs, value: &str) -> Result<CommandLine> {
    let mut cmdline = CommandLine::new(&args.command[0]);
    let mut substituted = false;
    for arg in &args.command[1..] {
        if arg.contains("{}") {
            cmdline = cmdline.arg(arg.replace("{}", value))?;
            substituted = true;
        } else {
            cmdline = cmdline.arg(arg)?;
        }
    }
    if !substituted {
        cmdline = cmdline.arg(value)?;
    }
    Ok(cmdline)
}
