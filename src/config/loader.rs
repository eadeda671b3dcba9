// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform
/// semantic validation (pool bounds, known OS families). Use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks pool bounds and the OS-family keys of `[packages.*]`.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Configuration with every default applied, used when no config file is
/// present (the file is optional; procpool works flag-only).
pub fn default_config() -> ConfigFile {
    ConfigFile::new_unchecked(RawConfigFile::default())
}

/// Helper to resolve the default config path: `Procpool.toml` in the
/// current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Procpool.toml")
}

/// Base directory for run/log state.
///
/// Priority: `[paths].root`, then `$PROCPOOL_ROOT`, then the current
/// directory. When `$ENVIRONMENT` is set, a stage subdirectory keeps
/// deployment stages from sharing PID records. Both variables are opaque
/// caller-supplied configuration, not something this crate interprets.
pub fn state_root(config: &ConfigFile) -> PathBuf {
    let base = config
        .paths
        .root
        .clone()
        .or_else(|| std::env::var_os("PROCPOOL_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));

    match std::env::var("ENVIRONMENT") {
        Ok(stage) if !stage.is_empty() => base.join(stage),
        _ => base,
    }
}

/// Run-file directory: `[paths].run_dir` or `<state root>/run`.
pub fn run_dir_path(config: &ConfigFile) -> PathBuf {
    config
        .paths
        .run_dir
        .clone()
        .unwrap_or_else(|| state_root(config).join("run"))
}

/// Log directory: `[paths].log_dir` or `<state root>/log`.
pub fn log_dir_path(config: &ConfigFile) -> PathBuf {
    config
        .paths
        .log_dir
        .clone()
        .unwrap_or_else(|| state_root(config).join("log"))
}
