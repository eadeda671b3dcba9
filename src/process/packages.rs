// src/process/packages.rs

//! OS package installation for missing commands.
//!
//! When a command cannot be resolved and packages were registered for the
//! detected OS family, the resolver runs the platform package manager once
//! (with its own bounded timeout) and the original resolution is retried
//! exactly once. A second failure propagates the original
//! `CommandNotFound` unmodified.

use std::fmt;
use std::fs;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::cmdline::{CommandLine, WhichCache};
use crate::errors::{ProcessError, Result};
use crate::process::handle::ProcessHandle;

/// Default wall-clock bound for one package-manager invocation.
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Operating system family, for choosing a package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
    Debian,
    RedHat,
    Alpine,
    Arch,
    Suse,
    MacOs,
    Unknown,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OsFamily::Debian => "debian",
            OsFamily::RedHat => "redhat",
            OsFamily::Alpine => "alpine",
            OsFamily::Arch => "arch",
            OsFamily::Suse => "suse",
            OsFamily::MacOs => "macos",
            OsFamily::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl FromStr for OsFamily {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debian" => Ok(OsFamily::Debian),
            "redhat" => Ok(OsFamily::RedHat),
            "alpine" => Ok(OsFamily::Alpine),
            "arch" => Ok(OsFamily::Arch),
            "suse" => Ok(OsFamily::Suse),
            "macos" => Ok(OsFamily::MacOs),
            other => Err(format!(
                "unknown OS family: {other} (expected debian, redhat, alpine, arch, suse or macos)"
            )),
        }
    }
}

impl OsFamily {
    /// Package-manager argv for installing `packages`, or `None` when no
    /// manager is known for this family.
    fn install_argv(self, packages: &[String]) -> Option<Vec<String>> {
        let mut argv: Vec<String> = match self {
            OsFamily::Debian => vec!["apt-get".into(), "install".into(), "-y".into()],
            OsFamily::RedHat => vec!["dnf".into(), "install".into(), "-y".into()],
            OsFamily::Alpine => vec!["apk".into(), "add".into()],
            OsFamily::Arch => vec!["pacman".into(), "-S".into(), "--noconfirm".into()],
            OsFamily::Suse => {
                vec!["zypper".into(), "--non-interactive".into(), "install".into()]
            }
            OsFamily::MacOs => vec!["brew".into(), "install".into()],
            OsFamily::Unknown => return None,
        };
        argv.extend(packages.iter().cloned());
        Some(argv)
    }
}

/// Detect the running OS family.
///
/// Linux detection parses `/etc/os-release` (`ID`, then `ID_LIKE`).
pub fn detect_os_family() -> OsFamily {
    if cfg!(target_os = "macos") {
        return OsFamily::MacOs;
    }

    let Ok(contents) = fs::read_to_string("/etc/os-release") else {
        return OsFamily::Unknown;
    };
    family_from_os_release(&contents)
}

fn family_from_os_release(contents: &str) -> OsFamily {
    let mut id = None;
    let mut id_like = None;

    for line in contents.lines() {
        if let Some(value) = line.strip_prefix("ID=") {
            id = Some(value.trim_matches('"').to_string());
        } else if let Some(value) = line.strip_prefix("ID_LIKE=") {
            id_like = Some(value.trim_matches('"').to_string());
        }
    }

    if let Some(id) = id {
        if let Some(family) = family_from_token(&id) {
            return family;
        }
    }
    if let Some(id_like) = id_like {
        for token in id_like.split_whitespace() {
            if let Some(family) = family_from_token(token) {
                return family;
            }
        }
    }

    OsFamily::Unknown
}

fn family_from_token(token: &str) -> Option<OsFamily> {
    match token {
        "debian" | "ubuntu" | "mint" => Some(OsFamily::Debian),
        "fedora" | "rhel" | "centos" | "rocky" | "almalinux" => Some(OsFamily::RedHat),
        "alpine" => Some(OsFamily::Alpine),
        "arch" | "manjaro" => Some(OsFamily::Arch),
        "opensuse" | "suse" | "sles" | "opensuse-leap" | "opensuse-tumbleweed" => {
            Some(OsFamily::Suse)
        }
        _ => None,
    }
}

/// Installs missing OS packages through the platform package manager.
#[derive(Debug)]
pub struct PackageResolver {
    which: Arc<WhichCache>,
    install_timeout: Duration,
}

impl PackageResolver {
    pub fn new(which: Arc<WhichCache>) -> Self {
        Self {
            which,
            install_timeout: INSTALL_TIMEOUT,
        }
    }

    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    /// Install `packages` for `os`.
    ///
    /// The installer runs as its own bounded [`ProcessHandle`] with no
    /// packages registered, so a missing package manager cannot recurse.
    pub async fn ensure_installed(&self, os: OsFamily, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }

        let Some(argv) = os.install_argv(packages) else {
            return Err(ProcessError::ConfigError(format!(
                "no package manager known for OS family {os}"
            )));
        };

        info!(os = %os, packages = ?packages, "installing OS packages");

        let mut parts = argv.into_iter();
        let program = parts.next().unwrap_or_default();
        let cmdline = CommandLine::new(program).args(parts)?;

        let mut handle = ProcessHandle::new(cmdline, Arc::clone(&self.which))
            .with_timeout(Some(self.install_timeout));

        match handle.execute_no_return().await {
            Ok(_) => {
                info!(os = %os, "package installation finished");
                Ok(())
            }
            Err(err) => {
                warn!(os = %os, error = %err, "package installation failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_release_id_wins() {
        let contents = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\n";
        assert_eq!(family_from_os_release(contents), OsFamily::Debian);
    }

    #[test]
    fn os_release_falls_back_to_id_like() {
        let contents = "ID=neon\nID_LIKE=\"ubuntu debian\"\n";
        assert_eq!(family_from_os_release(contents), OsFamily::Debian);
    }

    #[test]
    fn unknown_family_has_no_installer() {
        assert_eq!(OsFamily::Unknown.install_argv(&["x".into()]), None);
    }

    #[test]
    fn family_parse_round_trip() {
        assert_eq!("debian".parse::<OsFamily>(), Ok(OsFamily::Debian));
        assert!("plan9".parse::<OsFamily>().is_err());
    }
}
