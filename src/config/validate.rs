// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{ProcessError, Result};
use crate::process::packages::OsFamily;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = ProcessError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

pub fn validate_config(raw: &RawConfigFile) -> Result<()> {
    validate_raw_config(raw)
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_pool_section(cfg)?;
    validate_package_sections(cfg)?;
    Ok(())
}

fn validate_pool_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pool.max_workers == 0 {
        return Err(ProcessError::ConfigError(
            "[pool].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.pool.min_workers > cfg.pool.max_workers {
        return Err(ProcessError::ConfigError(format!(
            "[pool].min_workers ({}) must not exceed max_workers ({})",
            cfg.pool.min_workers, cfg.pool.max_workers
        )));
    }
    if cfg.pool.cycle_sleep_ms == 0 {
        return Err(ProcessError::ConfigError(
            "[pool].cycle_sleep_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_package_sections(cfg: &RawConfigFile) -> Result<()> {
    for family in cfg.packages.keys() {
        family.parse::<OsFamily>().map_err(|err| {
            ProcessError::ConfigError(format!("[packages.{family}]: {err}"))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::RawConfigFile;

    fn parse(toml_str: &str) -> RawConfigFile {
        toml::from_str(toml_str).expect("valid TOML")
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&RawConfigFile::default()).is_ok());
    }

    #[test]
    fn rejects_inverted_pool_bounds() {
        let raw = parse("[pool]\nmin_workers = 5\nmax_workers = 2\n");
        assert!(validate_config(&raw).is_err());
    }

    #[test]
    fn rejects_unknown_package_family() {
        let raw = parse("[packages.plan9]\nrsync = [\"rsync\"]\n");
        assert!(validate_config(&raw).is_err());
    }

    #[test]
    fn accepts_known_package_family() {
        let raw = parse("[packages.debian]\nrsync = [\"rsync\"]\n");
        assert!(validate_config(&raw).is_ok());
    }
}
