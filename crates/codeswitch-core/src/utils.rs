//! Shared utility functions for CodeSwitch crates

use crate::error::{Error, Result};
use std::path::PathBuf;

/// Application directory under the user's home
pub const APP_DIR_NAME: &str = ".code-switch";

/// Update engine working directory under [`APP_DIR_NAME`]
pub const UPDATE_DIR_NAME: &str = "update";

/// Get the user's home directory
///
/// Prefers the HOME environment variable over dirs::home_dir() so that
/// sandboxed launches with a redirected HOME keep their state together.
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }

    dirs::home_dir().ok_or(Error::HomeDirUnavailable)
}

/// Get the application directory (~/.code-switch)
pub fn get_app_dir() -> Result<PathBuf> {
    Ok(get_home_dir()?.join(APP_DIR_NAME))
}

/// Get the update engine data directory (~/.code-switch/update)
pub fn get_update_data_dir() -> Result<PathBuf> {
    Ok(get_app_dir()?.join(UPDATE_DIR_NAME))
}
