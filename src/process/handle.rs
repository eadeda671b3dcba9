// src/process/handle.rs

//! A single spawned OS command and its lifecycle.
//!
//! [`ProcessHandle`] owns the command line, exit-code policy, timeout,
//! sudo mode, run-file and restrictions for one invocation, and exposes the
//! execution strategies:
//!
//! - [`execute_return_lines`](ProcessHandle::execute_return_lines) /
//!   [`execute_return_string`](ProcessHandle::execute_return_string):
//!   blocking capture; stdout line order is preserved, stderr only ever
//!   appears in the failure tail.
//! - [`execute_no_return`](ProcessHandle::execute_no_return): blocking,
//!   output discarded (or appended to the log file when one is set).
//! - [`execute_passthru`](ProcessHandle::execute_passthru): streams child
//!   output to the caller's own stdio, returns whether the exit code was
//!   accepted.
//! - [`execute_background`](ProcessHandle::execute_background): detached
//!   spawn returning a PID; does NOT self-enforce the timeout (a
//!   supervisor or reaper kills overdue background processes).
//!
//! A handle is single-use: re-executing without [`reset`](ProcessHandle::reset)
//! is an error.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::cmdline::{CommandLine, OutputChannel, WhichCache};
use crate::errors::{ProcessError, Result};
use crate::process::packages::{OsFamily, PackageResolver, detect_os_family};
use crate::process::runfile::{RunFile, pid_alive};
use crate::restrict::{Restrictions, looks_like_path};

/// How long to wait between SIGTERM and SIGKILL when enforcing a timeout.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// How many trailing output lines a failure carries.
const OUTPUT_TAIL_LINES: usize = 20;

/// Privilege escalation mode for a handle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SudoMode {
    #[default]
    None,
    Root,
    User(String),
}

/// Outcome of one completed execution.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// Present only for background execution.
    pub pid: Option<u32>,
    pub exit_code: i32,
    /// Captured stdout split by line; empty for non-capturing strategies.
    pub output_lines: Vec<String>,
    pub duration: Duration,
}

impl ProcessResult {
    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }
}

/// One external command invocation and its lifecycle.
#[derive(Debug)]
pub struct ProcessHandle {
    cmdline: CommandLine,
    restrictions: Restrictions,
    accepted_exit_codes: HashSet<i32>,
    timeout: Option<Duration>,
    sudo: SudoMode,
    run_file: Option<RunFile>,
    log_path: Option<PathBuf>,
    which: Arc<WhichCache>,
    packages: HashMap<OsFamily, Vec<String>>,
    tracked_pid: Option<u32>,
    last_exit_code: Option<i32>,
    executed: bool,
}

impl ProcessHandle {
    pub fn new(cmdline: CommandLine, which: Arc<WhichCache>) -> Self {
        Self {
            cmdline,
            restrictions: Restrictions::allow_all(),
            accepted_exit_codes: HashSet::from([0]),
            timeout: None,
            sudo: SudoMode::None,
            run_file: None,
            log_path: None,
            which,
            packages: HashMap::new(),
            tracked_pid: None,
            last_exit_code: None,
            executed: false,
        }
    }

    pub fn with_restrictions(mut self, restrictions: Restrictions) -> Self {
        self.restrictions = restrictions;
        self
    }

    /// Replace the accepted exit-code set (default `{0}`).
    pub fn accept_exit_codes<I: IntoIterator<Item = i32>>(mut self, codes: I) -> Self {
        self.accepted_exit_codes = codes.into_iter().collect();
        self
    }

    /// Wall-clock timeout; zero seconds means unbounded.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = if secs == 0 {
            None
        } else {
            Some(Duration::from_secs(secs))
        };
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sudo(mut self, sudo: SudoMode) -> Self {
        self.sudo = sudo;
        self
    }

    /// Track this execution in a run-file (PID record).
    pub fn with_run_file(mut self, run_file: RunFile) -> Self {
        self.run_file = Some(run_file);
        self
    }

    /// Append combined output of non-capturing strategies to this file.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Register OS packages to auto-install once if the command is missing.
    pub fn register_packages(mut self, os: OsFamily, packages: Vec<String>) -> Self {
        self.packages.insert(os, packages);
        self
    }

    pub fn command_preview(&self) -> String {
        self.cmdline.display_preview()
    }

    /// Blocking capture; returns stdout split by line.
    pub async fn execute_return_lines(&mut self) -> Result<Vec<String>> {
        let (result, _) = self.run_captured().await?;
        Ok(result.output_lines)
    }

    /// Blocking capture; returns raw stdout with the trailing newline
    /// trimmed.
    pub async fn execute_return_string(&mut self) -> Result<String> {
        let (_, raw) = self.run_captured().await?;
        Ok(raw.trim_end_matches('\n').to_string())
    }

    /// Blocking execution; output is discarded (or appended to the log
    /// file), only the exit code matters.
    pub async fn execute_no_return(&mut self) -> Result<ProcessResult> {
        self.prepare().await?;
        let line = self.cmdline.render(false)?;
        let started = Instant::now();

        let mut cmd = self.shell_command(&line);
        match self.open_log_sink()? {
            Some((out, err)) => {
                cmd.stdout(out).stderr(err);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::piped());
            }
        }

        let mut child = cmd.spawn()?;
        self.mark_spawned(child.id());

        let stderr_task = Self::collect_stderr(&mut child);
        let status = self.wait_with_timeout(&mut child, &line).await;
        let stderr_lines = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        self.cleanup_run_file();

        let status = status?;
        let exit_code = status.code().unwrap_or(-1);
        self.last_exit_code = Some(exit_code);
        self.check_exit_code(exit_code, &line, stderr_lines)?;

        Ok(ProcessResult {
            pid: None,
            exit_code,
            output_lines: Vec::new(),
            duration: started.elapsed(),
        })
    }

    /// Stream child stdout/stderr straight to the caller's own streams.
    ///
    /// Nothing is buffered, so no post-hoc parsing is possible; the return
    /// value is whether the exit code was accepted.
    pub async fn execute_passthru(&mut self) -> Result<bool> {
        self.prepare().await?;
        let line = self.cmdline.render(false)?;

        let mut cmd = self.shell_command(&line);
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());

        let mut child = cmd.spawn()?;
        self.mark_spawned(child.id());

        let status = self.wait_with_timeout(&mut child, &line).await;
        self.cleanup_run_file();

        let status = status?;
        let exit_code = status.code().unwrap_or(-1);
        self.last_exit_code = Some(exit_code);
        Ok(self.accepted_exit_codes.contains(&exit_code))
    }

    /// Spawn detached and return the PID immediately.
    ///
    /// The rendered line backgrounds the command and echoes `$!`, which is
    /// parsed here, written to the run-file and returned. The timeout is
    /// deliberately NOT enforced: a detached process is expected to outlive
    /// this call, so the spawning call cannot own its deadline.
    pub async fn execute_background(&mut self) -> Result<u32> {
        self.prepare().await?;

        // Route output to the log sink before rendering, so the detached
        // process keeps a place to write after we return.
        if self.cmdline.output_redirect_paths().next().is_none() {
            if let Some(log) = self.log_path.clone() {
                let cmdline = std::mem::replace(&mut self.cmdline, CommandLine::literal(""));
                self.cmdline = cmdline
                    .redirect_output(OutputChannel::Stdout, log.clone(), true)?
                    .redirect_output(OutputChannel::Stderr, log, true)?;
            }
        }

        let line = self.cmdline.render(true)?;

        let mut cmd = self.shell_command(&line);
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());

        let mut child = cmd.spawn()?;
        self.executed = true;

        let stdout = child.stdout.take();
        let pid_line = match stdout {
            Some(stdout) => {
                let mut lines = BufReader::new(stdout).lines();
                lines.next_line().await?.unwrap_or_default()
            }
            None => String::new(),
        };

        // The spawning shell exits right after echoing; reap it.
        let _ = child.wait().await;

        let pid: u32 = pid_line.trim().parse().map_err(|_| {
            ProcessError::Other(anyhow!(
                "background spawn did not report a PID (got {pid_line:?})"
            ))
        })?;

        self.tracked_pid = Some(pid);
        if let Some(run_file) = &self.run_file {
            run_file.write_pid(pid)?;
        }

        info!(pid, command = %line, "background process spawned");
        Ok(pid)
    }

    /// Send a signal to the tracked PID.
    ///
    /// A process that already exited is a no-op, not an error; a signal
    /// number the platform does not know is `InvalidArgument`.
    pub fn kill(&self, signal: i32) -> Result<()> {
        let sig = Signal::try_from(signal).map_err(|_| {
            ProcessError::InvalidArgument(format!("invalid signal number: {signal}"))
        })?;

        let Some(pid) = self.current_pid() else {
            return Ok(());
        };

        match kill(Pid::from_raw(pid as i32), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(ProcessError::Other(anyhow!(
                "kill({pid}, {sig:?}) failed: {err}"
            ))),
        }
    }

    /// Whether the tracked process is currently alive.
    pub fn is_executing(&self) -> bool {
        match self.current_pid() {
            Some(pid) => pid_alive(pid),
            None => false,
        }
    }

    /// Whether a started process has finished.
    ///
    /// Cleans up the stale run-file when the PID turned out dead, so a
    /// completed background process leaves no record behind.
    pub fn is_finished(&self) -> bool {
        match self.current_pid() {
            Some(pid) => {
                if pid_alive(pid) {
                    false
                } else {
                    if let Some(run_file) = &self.run_file {
                        run_file.remove();
                    }
                    true
                }
            }
            None => self.executed,
        }
    }

    /// Exit code of the most recent completed execution, accepted or not.
    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit_code
    }

    /// Clear cached command-line and run state so the handle can execute
    /// again.
    pub fn reset(&mut self) {
        self.cmdline.clear_rendered();
        self.tracked_pid = None;
        self.last_exit_code = None;
        self.executed = false;
    }

    fn current_pid(&self) -> Option<u32> {
        self.tracked_pid
            .or_else(|| self.run_file.as_ref().and_then(|f| f.read_pid()))
    }

    /// Shared pre-spawn phase: single-use check, restriction checks,
    /// which-resolution (with one package-install retry), sudo probe.
    async fn prepare(&mut self) -> Result<()> {
        if self.executed {
            return Err(ProcessError::InvalidArgument(
                "handle already executed; call reset() before re-executing".to_string(),
            ));
        }

        self.check_restrictions()?;
        self.resolve_program().await?;
        self.probe_sudo().await?;
        Ok(())
    }

    /// Fail closed on any path outside the allow-list, before any spawn.
    fn check_restrictions(&self) -> Result<()> {
        if let Some(dir) = self.cmdline.working_dir() {
            self.restrictions.check(dir, false)?;
        }
        for (value, _) in self.cmdline.arg_values() {
            if looks_like_path(value) {
                self.restrictions.check(std::path::Path::new(value), false)?;
            }
        }
        if let Some(input) = self.cmdline.input_redirect_path() {
            self.restrictions.check(input, false)?;
        }
        for path in self.cmdline.output_redirect_paths() {
            self.restrictions.check(path, true)?;
        }
        if let Some(log) = &self.log_path {
            self.restrictions.check(log, true)?;
        }
        Ok(())
    }

    async fn resolve_program(&mut self) -> Result<()> {
        if !self.cmdline.resolve_via_which() {
            return Ok(());
        }

        let program = self.cmdline.program().to_string();
        match self.which.resolve(&program) {
            Ok(path) => self.cmdline.set_resolved(path),
            Err(original) => {
                let os = detect_os_family();
                let Some(packages) = self.packages.get(&os).cloned() else {
                    return Err(original);
                };

                info!(
                    command = %program,
                    os = %os,
                    packages = ?packages,
                    "command missing; attempting package installation"
                );

                let resolver = PackageResolver::new(Arc::clone(&self.which));
                if let Err(err) = Box::pin(resolver.ensure_installed(os, &packages)).await {
                    warn!(command = %program, error = %err, "package installation failed");
                    // Propagate the root cause, not the installer failure.
                    return Err(original);
                }

                self.which.invalidate(&program);
                match self.which.resolve(&program) {
                    Ok(path) => self.cmdline.set_resolved(path),
                    Err(_) => Err(original),
                }
            }
        }
    }

    /// `sudo -n true` probe: detects missing privilege without running the
    /// real command.
    async fn probe_sudo(&self) -> Result<()> {
        if self.sudo == SudoMode::None {
            return Ok(());
        }

        let status = Command::new("sudo")
            .args(["-n", "true"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(ProcessError::NoSudo)
        }
    }

    fn shell_command(&self, line: &str) -> Command {
        let mut cmd = match &self.sudo {
            SudoMode::None => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(line);
                c
            }
            SudoMode::Root => {
                let mut c = Command::new("sudo");
                c.args(["-n", "sh", "-c"]).arg(line);
                c
            }
            SudoMode::User(user) => {
                let mut c = Command::new("sudo");
                c.args(["-n", "-u", user, "sh", "-c"]).arg(line);
                c
            }
        };

        if let Some(dir) = self.cmdline.working_dir() {
            cmd.current_dir(dir);
        }
        cmd.envs(self.cmdline.env_vars());
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }

    fn mark_spawned(&mut self, pid: Option<u32>) {
        self.executed = true;
        self.tracked_pid = pid;
        if let (Some(run_file), Some(pid)) = (&self.run_file, pid) {
            // Registration failure is not worth killing the run over.
            if let Err(err) = run_file.write_pid(pid) {
                warn!(error = %err, "failed to write run-file");
            }
        }
        debug!(pid = ?pid, command = %self.cmdline.display_preview(), "process spawned");
    }

    fn cleanup_run_file(&self) {
        if let Some(run_file) = &self.run_file {
            run_file.remove();
        }
    }

    async fn run_captured(&mut self) -> Result<(ProcessResult, String)> {
        self.prepare().await?;
        let line = self.cmdline.render(false)?;
        let started = Instant::now();

        let mut cmd = self.shell_command(&line);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        self.mark_spawned(child.id());

        let stdout = child.stdout.take();
        let stdout_task = tokio::spawn(async move {
            let mut raw = Vec::new();
            if let Some(mut stdout) = stdout {
                let _ = stdout.read_to_end(&mut raw).await;
            }
            raw
        });
        let stderr_task = Self::collect_stderr(&mut child);

        let status = self.wait_with_timeout(&mut child, &line).await;

        let raw_stdout = stdout_task.await.unwrap_or_default();
        let stderr_lines = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        self.cleanup_run_file();

        let status = status?;
        let exit_code = status.code().unwrap_or(-1);
        self.last_exit_code = Some(exit_code);
        let raw_stdout = String::from_utf8_lossy(&raw_stdout).into_owned();
        let output_lines: Vec<String> = raw_stdout.lines().map(str::to_string).collect();

        if !self.accepted_exit_codes.contains(&exit_code) {
            let mut tail = stderr_lines;
            tail.extend(output_lines);
            return Err(failed(&line, exit_code, tail));
        }

        debug!(
            exit_code,
            lines = output_lines.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "process captured"
        );

        Ok((
            ProcessResult {
                pid: None,
                exit_code,
                output_lines,
                duration: started.elapsed(),
            },
            raw_stdout,
        ))
    }

    fn collect_stderr(child: &mut Child) -> Option<tokio::task::JoinHandle<Vec<String>>> {
        let stderr = child.stderr.take()?;
        Some(tokio::spawn(async move {
            let mut collected = Vec::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected
        }))
    }

    fn check_exit_code(&self, exit_code: i32, line: &str, stderr_lines: Vec<String>) -> Result<()> {
        if self.accepted_exit_codes.contains(&exit_code) {
            Ok(())
        } else {
            Err(failed(line, exit_code, stderr_lines))
        }
    }

    /// Wait for exit, enforcing the armed deadline.
    ///
    /// On expiry the process gets SIGTERM, a grace window, then SIGKILL,
    /// and the caller sees a `Timeout` error with the process confirmed
    /// dead.
    async fn wait_with_timeout(
        &self,
        child: &mut Child,
        line: &str,
    ) -> Result<std::process::ExitStatus> {
        let Some(limit) = self.timeout else {
            return Ok(child.wait().await?);
        };

        match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!(
                    timeout_secs = limit.as_secs(),
                    command = %line,
                    "timeout exceeded; terminating process"
                );
                terminate_with_grace(child).await;
                Err(ProcessError::Timeout {
                    command: line.to_string(),
                    timeout_secs: limit.as_secs(),
                })
            }
        }
    }

    fn open_log_sink(&self) -> Result<Option<(Stdio, Stdio)>> {
        let Some(path) = &self.log_path else {
            return Ok(None);
        };
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let err = file.try_clone()?;
        Ok(Some((Stdio::from(file), Stdio::from(err))))
    }
}

fn failed(line: &str, exit_code: i32, mut tail: Vec<String>) -> ProcessError {
    if tail.len() > OUTPUT_TAIL_LINES {
        tail.drain(..tail.len() - OUTPUT_TAIL_LINES);
    }
    ProcessError::ProcessFailed {
        command: line.to_string(),
        exit_code,
        output_tail: tail,
    }
}

/// SIGTERM, wait out the grace window, then SIGKILL.
async fn terminate_with_grace(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }

    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        if let Err(err) = child.kill().await {
            warn!(error = %err, "failed to SIGKILL timed-out process");
        }
    }
}
