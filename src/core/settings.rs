// src/core/settings.rs

use crate::core::paths::{self, PathError};
use crate::core::search_scope::SearchScope;
use crate::models::Settings;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("Could not access settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Could not write default settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Loads `settings.toml` from the config directory, writing the defaults
/// there on first use.
pub fn load_settings() -> Result<Settings, SettingsError> {
    load_settings_from(&paths::get_settings_path()?)
}

/// Loads settings from `path`, creating it with the defaults if missing.
pub fn load_settings_from(path: &Path) -> Result<Settings, SettingsError> {
    if !path.exists() {
        let defaults = Settings::default();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(&defaults)?)?;
        log::info!("Wrote default settings to '{}'", path.display());
        return Ok(defaults);
    }
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

impl Settings {
    /// `project_folder` with `~` and variables expanded. An unexpandable
    /// value is ignored.
    pub fn resolved_project_folder(&self) -> Option<PathBuf> {
        let folder = self.project_folder.as_ref()?;
        match paths::expand_path_template(&folder.to_string_lossy()) {
            Ok(expanded) => Some(expanded),
            Err(e) => {
                log::warn!("Ignoring project folder: {}", e);
                None
            }
        }
    }

    /// Where to look for flag sources of `file`.
    pub fn search_scope_for(&self, file: &Path) -> SearchScope {
        if self.search_folders.is_empty() {
            return SearchScope::for_file(file, self.resolved_project_folder());
        }
        let folders = self
            .search_folders
            .iter()
            .filter_map(|folder| match paths::expand_path_template(&folder.to_string_lossy()) {
                Ok(expanded) => Some(expanded),
                Err(e) => {
                    log::warn!("Ignoring search folder: {}", e);
                    None
                }
            })
            .collect();
        SearchScope::List(folders)
    }

    pub fn max_cache_age(&self) -> Duration {
        Duration::from_secs(self.max_cache_age_secs)
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_period_secs)
    }

    pub fn job_delay(&self) -> Duration {
        Duration::from_millis(self.job_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FlagsSourceKind;

    #[test]
    fn test_defaults_written_on_first_load() {
        // --- Setup ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        // --- Execute ---
        let first = load_settings_from(&path).unwrap();
        let second = load_settings_from(&path).unwrap();

        // --- Assert ---
        assert!(path.is_file());
        assert_eq!(first, Settings::default());
        assert_eq!(first, second);
    }

    #[test]
    fn test_user_values_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "flags_sources = [\"flags_file\"]\nmax_cache_age_secs = 60\nproject_folder = \"/work/proj\"\n",
        )
        .unwrap();

        let settings = load_settings_from(&path).unwrap();

        assert_eq!(settings.flags_sources, vec![FlagsSourceKind::FlagsFile]);
        assert_eq!(settings.max_cache_age(), Duration::from_secs(60));
        assert_eq!(
            settings.search_scope_for(Path::new("/work/proj/src/a.cpp")),
            SearchScope::tree("/work/proj/src", Some(PathBuf::from("/work/proj")))
        );
    }

    #[test]
    fn test_search_folders_make_a_list_scope() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "project_folder = \"/work/proj\"\nsearch_folders = [\"/work/flags\", \"/work/proj\"]\n",
        )
        .unwrap();

        let settings = load_settings_from(&path).unwrap();

        assert_eq!(
            settings.search_scope_for(Path::new("/work/proj/src/a.cpp")),
            SearchScope::List(vec![PathBuf::from("/work/flags"), PathBuf::from("/work/proj")])
        );
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "flags_sources = 42").unwrap();

        assert!(matches!(load_settings_from(&path), Err(SettingsError::Parse(_))));
    }
}
