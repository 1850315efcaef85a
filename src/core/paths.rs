// src/core/paths.rs

use crate::constants::{CMAKE_BUILDS_DIR, CONFIG_DIR_NAME, SETTINGS_FILENAME};
use lazy_static::lazy_static;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

lazy_static! {
    static ref APP_CONFIG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

const HASH_TRUNCATE_LENGTH: usize = 16; // 16 bytes = 32 hex characters

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
    #[error("Could not create config directory at '{path}': {source}")]
    ConfigDirCreation {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to expand path '{template}': {reason}")]
    Expansion { template: String, reason: String },
}

/// Returns the path to the configuration directory (`~/.config/clang-assist`).
/// Creates it if it doesn't exist.
///
/// Memoized: the first call computes and caches the path, subsequent calls
/// return the cached value.
pub fn get_app_config_dir() -> Result<PathBuf, PathError> {
    let mut cached_path_guard = APP_CONFIG_DIR
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(path) = &*cached_path_guard {
        return Ok(path.clone());
    }

    let config_path = dirs::config_dir()
        .ok_or(PathError::ConfigDirNotFound)?
        .join(CONFIG_DIR_NAME);

    if !config_path.exists() {
        fs::create_dir_all(&config_path).map_err(|e| PathError::ConfigDirCreation {
            path: config_path.display().to_string(),
            source: e,
        })?;
    }

    *cached_path_guard = Some(config_path.clone());
    Ok(config_path)
}

/// Returns the path to `settings.toml`.
pub fn get_settings_path() -> Result<PathBuf, PathError> {
    get_app_config_dir().map(|dir| dir.join(SETTINGS_FILENAME))
}

/// Expands `~` and environment variables (`$VAR`, `${VAR}`) in a path setting.
pub fn expand_path_template(template: &str) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(template).map_err(|e| PathError::Expansion {
        template: template.to_string(),
        reason: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// Lexically normalizes a path: removes `.` components and folds `..` into
/// the preceding component. The filesystem is not consulted, so the path
/// does not need to exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}

/// Anchors `path` at `folder` when it is relative, then normalizes it.
pub fn absolutize(folder: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&folder.join(path))
    }
}

/// A stable, filesystem-safe identifier derived from a path.
pub fn unique_str(path: &Path) -> String {
    let hash = blake3::hash(path.as_os_str().as_encoded_bytes());
    hex::encode(hash.as_bytes().get(..HASH_TRUNCATE_LENGTH).unwrap_or_default())
}

/// Root of all temporary artifacts of this crate.
pub fn get_temp_root() -> PathBuf {
    std::env::temp_dir().join(CONFIG_DIR_NAME)
}

/// The build directory used to configure the CMake project whose root file
/// is `cmake_lists`. Each project gets its own directory.
pub fn cmake_build_dir(temp_root: &Path, cmake_lists: &Path) -> PathBuf {
    temp_root.join(CMAKE_BUILDS_DIR).join(unique_str(cmake_lists))
}
