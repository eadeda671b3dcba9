// src/config/mod.rs

//! Configuration loading and validation for procpool.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate pool bounds and package sections (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    default_config, default_config_path, load_and_validate, load_from_path, log_dir_path,
    run_dir_path, state_root,
};
pub use model::{
    ConfigFile, DefaultsSection, PathsSection, PoolSection, RawConfigFile, RestrictionsSection,
};
pub use validate::validate_config;
