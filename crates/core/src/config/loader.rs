//! Config path resolution
//!
//! Handles resolving paths for configuration files based on the host
//! executable's location.

use std::path::{Path, PathBuf};

use super::{ConfigError, ConfigResult};

/// Name of the directory next to the host executable holding our files
pub const BASE_DIR_NAME: &str = "modhost";

/// Returns the modhost base directory next to the host executable.
///
/// The library is injected into a host such as:
/// `<game>/Game.exe`
///
/// Our files live in:
/// `<game>/modhost/`
pub fn modhost_base_dir() -> ConfigResult<PathBuf> {
    let exe = std::env::current_exe().map_err(ConfigError::IoError)?;
    exe.parent()
        .map(base_dir_for)
        .ok_or(ConfigError::NoConfigDirectory)
}

/// Base directory for a given host executable directory
pub fn base_dir_for(exe_dir: &Path) -> PathBuf {
    exe_dir.join(BASE_DIR_NAME)
}

/// Returns the base configs directory.
///
/// Path: `<game>/modhost/configs/`
pub fn configs_dir() -> ConfigResult<PathBuf> {
    Ok(modhost_base_dir()?.join("configs"))
}

/// Returns the log directory.
///
/// Path: `<game>/modhost/logs/`
pub fn logs_dir() -> ConfigResult<PathBuf> {
    Ok(modhost_base_dir()?.join("logs"))
}

/// Returns the core config path.
///
/// Path: `<game>/modhost/configs/core.toml`
pub fn core_config_path() -> ConfigResult<PathBuf> {
    Ok(configs_dir()?.join("core.toml"))
}
