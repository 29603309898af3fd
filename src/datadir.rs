//! Platform data-directory discovery.
//!
//! The SQLite database and the log file live under a per-user application
//! data directory chosen by OS convention:
//!
//! - Linux and other Unix: `$XDG_DATA_HOME/download-manager`, falling back
//!   to `~/.local/share/download-manager`
//! - macOS: `~/Library/Application Support/download-manager`
//! - Windows: `%LOCALAPPDATA%\download-manager`

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Directory name used under the platform base directory.
pub const APP_DIR_NAME: &str = "download-manager";

/// Errors locating or creating the application data directory.
#[derive(Debug, Error)]
pub enum DataDirError {
    /// A required environment variable was not set.
    #[error("{0} environment variable not set")]
    MissingEnv(&'static str),

    /// Creating the directory failed.
    #[error("failed to create data directory: {0}")]
    Io(#[from] io::Error),
}

/// Returns the application data directory, creating it if absent.
///
/// # Errors
///
/// Returns [`DataDirError::MissingEnv`] when the platform base directory
/// cannot be determined, or [`DataDirError::Io`] when creation fails.
pub fn app_data_dir() -> Result<PathBuf, DataDirError> {
    let base = base_dir()?;
    std::fs::create_dir_all(&base)?;
    Ok(base)
}

#[cfg(target_os = "windows")]
fn base_dir() -> Result<PathBuf, DataDirError> {
    std::env::var_os("LOCALAPPDATA")
        .map(|appdata| PathBuf::from(appdata).join(APP_DIR_NAME))
        .ok_or(DataDirError::MissingEnv("LOCALAPPDATA"))
}

#[cfg(target_os = "macos")]
fn base_dir() -> Result<PathBuf, DataDirError> {
    std::env::var_os("HOME")
        .map(|home| {
            PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join(APP_DIR_NAME)
        })
        .ok_or(DataDirError::MissingEnv("HOME"))
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn base_dir() -> Result<PathBuf, DataDirError> {
    if let Some(data_home) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(data_home).join(APP_DIR_NAME));
    }
    std::env::var_os("HOME")
        .map(|home| {
            PathBuf::from(home)
                .join(".local")
                .join("share")
                .join(APP_DIR_NAME)
        })
        .ok_or(DataDirError::MissingEnv("HOME"))
}
