//! Per-user directories for config and logs.

use std::path::PathBuf;

use crate::constants::APP_DIR_NAME;
use crate::error::{CrError, CrResult};

/// Namespace for the OS-specific application directories.
pub struct Platform;

impl Platform {
    /// Where logs and other generated data go, e.g. `~/.local/share/ChaosRoute`.
    pub fn data_dir() -> CrResult<PathBuf> {
        app_dir(dirs::data_dir(), "data")
    }

    /// Where `config.toml` lives, e.g. `~/.config/ChaosRoute`.
    pub fn config_dir() -> CrResult<PathBuf> {
        app_dir(dirs::config_dir(), "config")
    }
}

fn app_dir(base: Option<PathBuf>, kind: &str) -> CrResult<PathBuf> {
    base.map(|b| b.join(APP_DIR_NAME))
        .ok_or_else(|| CrError::Config(format!("no {kind} directory for this user")))
}
