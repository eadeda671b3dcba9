// src/cmdline/builder.rs

//! Assembles a single shell invocation from a program, ordered arguments
//! with per-argument escape control, redirections and an optional pipe.
//!
//! The rendered command line is memoized: the first call to [`CommandLine::render`]
//! fixes the string (including the background suffix), and every later call
//! returns the cached value. Mutating a rendered command line is a
//! programming error and fails fast instead of silently rebuilding.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cmdline::escape::{escape_arg, quote_sh};
use crate::errors::{ProcessError, Result};

/// Output channel for redirections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    Stdout,
    Stderr,
}

impl OutputChannel {
    fn fd(self) -> u8 {
        match self {
            OutputChannel::Stdout => 1,
            OutputChannel::Stderr => 2,
        }
    }
}

/// One positional argument and whether it is shell-escaped when rendered.
///
/// `escape = false` is for values that must reach the shell verbatim, such
/// as an already-safe `$VAR` substitution token.
#[derive(Debug, Clone)]
struct Arg {
    value: String,
    escape: bool,
}

#[derive(Debug, Clone)]
struct OutputRedirect {
    channel: OutputChannel,
    path: PathBuf,
    append: bool,
}

/// Target of a pipe: either another built command or a raw command string.
#[derive(Debug, Clone)]
enum PipeTarget {
    Command(Box<CommandLine>),
    Raw(String),
}

/// A single external command invocation, not yet spawned.
#[derive(Debug, Clone)]
pub struct CommandLine {
    program: String,
    resolve_via_which: bool,
    resolved: Option<PathBuf>,
    args: Vec<Arg>,
    env: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
    input_redirect: Option<PathBuf>,
    output_redirects: Vec<OutputRedirect>,
    pipe_to: Option<PipeTarget>,
    rendered: Option<String>,
}

impl CommandLine {
    /// New command whose program is resolved via the `which` cache at
    /// execution time.
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_resolution(program, true)
    }

    /// New command whose program string is used literally, skipping
    /// resolution (e.g. shell builtins or already-absolute paths that must
    /// not be second-guessed).
    pub fn literal(program: impl Into<String>) -> Self {
        Self::with_resolution(program, false)
    }

    fn with_resolution(program: impl Into<String>, resolve_via_which: bool) -> Self {
        Self {
            program: program.into(),
            resolve_via_which,
            resolved: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            input_redirect: None,
            output_redirects: Vec::new(),
            pipe_to: None,
            rendered: None,
        }
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.rendered.is_some() {
            return Err(ProcessError::InvalidArgument(
                "command line is frozen after rendering; reset the handle to rebuild".to_string(),
            ));
        }
        Ok(())
    }

    /// Append one shell-escaped argument.
    pub fn arg(mut self, value: impl Into<String>) -> Result<Self> {
        self.ensure_mutable()?;
        self.args.push(Arg {
            value: value.into(),
            escape: true,
        });
        Ok(self)
    }

    /// Append one argument verbatim, without escaping.
    pub fn raw_arg(mut self, value: impl Into<String>) -> Result<Self> {
        self.ensure_mutable()?;
        self.args.push(Arg {
            value: value.into(),
            escape: false,
        });
        Ok(self)
    }

    /// Append several shell-escaped arguments in order.
    pub fn args<I, S>(mut self, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_mutable()?;
        for value in values {
            self.args.push(Arg {
                value: value.into(),
                escape: true,
            });
        }
        Ok(self)
    }

    /// Set an environment variable for the spawned process.
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        self.ensure_mutable()?;
        self.env.insert(name.into(), value.into());
        Ok(self)
    }

    /// Set the working directory the process changes to before exec.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Result<Self> {
        self.ensure_mutable()?;
        self.cwd = Some(dir.into());
        Ok(self)
    }

    /// Redirect stdin from a file.
    pub fn redirect_input(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        self.ensure_mutable()?;
        self.input_redirect = Some(path.into());
        Ok(self)
    }

    /// Redirect an output channel to a file, truncating or appending.
    pub fn redirect_output(
        mut self,
        channel: OutputChannel,
        path: impl Into<PathBuf>,
        append: bool,
    ) -> Result<Self> {
        self.ensure_mutable()?;
        self.output_redirects.retain(|r| r.channel != channel);
        self.output_redirects.push(OutputRedirect {
            channel,
            path: path.into(),
            append,
        });
        Ok(self)
    }

    /// Pipe this command's stdout into another built command.
    ///
    /// Chains are at most one link deep per hop: the target must not have a
    /// pipe of its own, and this command must not redirect stdout.
    pub fn pipe_to(mut self, other: CommandLine) -> Result<Self> {
        self.ensure_mutable()?;
        self.check_pipe_allowed()?;
        if other.pipe_to.is_some() {
            return Err(ProcessError::InvalidArgument(
                "pipe target may not itself pipe further".to_string(),
            ));
        }
        self.pipe_to = Some(PipeTarget::Command(Box::new(other)));
        Ok(self)
    }

    /// Pipe this command's stdout into a raw command string, used verbatim.
    pub fn pipe_to_command(mut self, command: impl Into<String>) -> Result<Self> {
        self.ensure_mutable()?;
        self.check_pipe_allowed()?;
        self.pipe_to = Some(PipeTarget::Raw(command.into()));
        Ok(self)
    }

    fn check_pipe_allowed(&self) -> Result<()> {
        if self.pipe_to.is_some() {
            return Err(ProcessError::InvalidArgument(
                "command already has a pipe target".to_string(),
            ));
        }
        if self
            .output_redirects
            .iter()
            .any(|r| r.channel == OutputChannel::Stdout)
        {
            return Err(ProcessError::InvalidArgument(
                "cannot pipe a command whose stdout is redirected".to_string(),
            ));
        }
        Ok(())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn resolve_via_which(&self) -> bool {
        self.resolve_via_which
    }

    /// Record the resolved executable path; must happen before rendering.
    pub(crate) fn set_resolved(&mut self, path: PathBuf) -> Result<()> {
        self.ensure_mutable()?;
        self.resolved = Some(path);
        Ok(())
    }

    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Argument values in order, with their escape flags.
    pub fn arg_values(&self) -> impl Iterator<Item = (&str, bool)> {
        self.args.iter().map(|a| (a.value.as_str(), a.escape))
    }

    pub fn input_redirect_path(&self) -> Option<&Path> {
        self.input_redirect.as_deref()
    }

    /// Output redirect targets with their write-append flags.
    pub fn output_redirect_paths(&self) -> impl Iterator<Item = &Path> {
        self.output_redirects.iter().map(|r| r.path.as_path())
    }

    pub fn is_rendered(&self) -> bool {
        self.rendered.is_some()
    }

    /// Unfreeze a rendered command line for explicit reuse.
    pub(crate) fn clear_rendered(&mut self) {
        self.rendered = None;
    }

    /// Human-readable form for logs and error messages; does not freeze.
    pub fn display_preview(&self) -> String {
        match &self.rendered {
            Some(line) => line.clone(),
            None => self.render_fragment(),
        }
    }

    fn has_redirect(&self, channel: OutputChannel) -> bool {
        let own = self
            .output_redirects
            .iter()
            .any(|r| r.channel == channel);
        let piped = match &self.pipe_to {
            Some(PipeTarget::Command(cmd)) => cmd.has_redirect(channel),
            _ => false,
        };
        own || piped
    }

    /// Build the full command line, memoized after the first call.
    ///
    /// With `background = true` the line runs detached: output channels
    /// without explicit redirects go to `/dev/null` (so the parent never
    /// blocks on a closed pipe) and `& echo $!` makes the spawning shell
    /// print the detached PID on stdout.
    pub fn render(&mut self, background: bool) -> Result<String> {
        if let Some(line) = &self.rendered {
            return Ok(line.clone());
        }

        let mut line = self.render_fragment();

        match &self.pipe_to {
            Some(PipeTarget::Command(cmd)) => {
                line.push_str(" | ");
                line.push_str(&cmd.render_fragment());
            }
            Some(PipeTarget::Raw(raw)) => {
                line.push_str(" | ");
                line.push_str(raw);
            }
            None => {}
        }

        if background {
            if !self.has_redirect(OutputChannel::Stdout) {
                line.push_str(" > /dev/null");
            }
            if !self.has_redirect(OutputChannel::Stderr) {
                line.push_str(" 2> /dev/null");
            }
            line.push_str(" & echo $!");
        }

        self.rendered = Some(line.clone());
        Ok(line)
    }

    fn render_fragment(&self) -> String {
        let program = match &self.resolved {
            Some(path) => path.to_string_lossy().into_owned(),
            None => self.program.clone(),
        };

        let mut parts = vec![escape_arg(&program)];

        for arg in &self.args {
            if arg.escape {
                parts.push(escape_arg(&arg.value));
            } else {
                parts.push(arg.value.clone());
            }
        }

        if let Some(input) = &self.input_redirect {
            parts.push(format!("< {}", quote_sh(&input.to_string_lossy())));
        }

        for redirect in &self.output_redirects {
            let op = if redirect.append { ">>" } else { ">" };
            let fd = redirect.channel.fd();
            let prefix = if fd == 1 { String::new() } else { fd.to_string() };
            parts.push(format!(
                "{prefix}{op} {}",
                quote_sh(&redirect.path.to_string_lossy())
            ));
        }

        parts.join(" ")
    }
}
